use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use crate::{
    Connector, Device, Identity, Secret, TransportError, Udi,
    payload::{Origin, Payload},
};

pub const UDI: [u8; 8] = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];

pub fn loader_payload() -> Payload {
    Payload::new(Origin::Embedded, vec![0x6f, 0x00, 0x00, 0x00, 0x13, 0x00]).unwrap()
}

pub fn app_payload() -> Payload {
    Payload::new(Origin::File("app.bin".into()), vec![0x01, 0x02, 0x03, 0x04]).unwrap()
}

/// Everything the device was asked to do, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Connect { port: String, speed: u32 },
    Identity,
    Udi,
    /// A program, with every piece received so far.
    Load(Vec<u8>),
    Close,
}

/// Operation to inject a failure in, or to hook.
///
/// `Load(n)` is the announcement of the n-th program on the device, starting at 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Connect,
    Identity,
    Udi,
    Load(usize),
    Close,
}

#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
    secrets: Arc<Mutex<Vec<Vec<u8>>>>,
    pieces: Arc<Mutex<Vec<usize>>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn loads(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Load(_)))
            .count()
    }

    /// Secrets of every load that had one.
    pub fn secrets(&self) -> Vec<Vec<u8>> {
        self.secrets.lock().unwrap().clone()
    }

    /// Length of every program piece received, across all loads.
    pub fn pieces(&self) -> Vec<usize> {
        self.pieces.lock().unwrap().clone()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn receive(&self, chunk: &[u8]) {
        self.pieces.lock().unwrap().push(chunk.len());
        if let Some(Call::Load(program)) = self.calls.lock().unwrap().last_mut() {
            program.extend_from_slice(chunk);
        }
    }
}

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub struct MockConnector {
    log: CallLog,
    failing: Option<Op>,
    hook: Option<(Op, Hook)>,
    delay: Duration,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `op` with a transport error.
    pub fn failing(mut self, op: Op) -> Self {
        self.failing = Some(op);
        self
    }

    /// Run `hook` at the start of `op`, while the device is in use.
    pub fn on(mut self, op: Op, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hook = Some((op, Arc::new(hook)));
        self
    }

    /// Take `delay` to transfer every program piece.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }
}

impl Connector for MockConnector {
    type Device = MockDevice;

    fn connect(&self, port: &str, speed: u32) -> Result<MockDevice, TransportError> {
        self.log.push(Call::Connect {
            port: port.to_owned(),
            speed,
        });

        let device = MockDevice {
            connector: self.clone(),
            loads: 0,
        };
        device.enter(Op::Connect)?;
        Ok(device)
    }
}

pub struct MockDevice {
    connector: MockConnector,
    loads: usize,
}

impl MockDevice {
    fn enter(&self, op: Op) -> Result<(), TransportError> {
        if let Some((hooked, hook)) = &self.connector.hook {
            if *hooked == op {
                hook();
            }
        }

        if self.connector.failing == Some(op) {
            Err(TransportError::Status(0x01))
        } else {
            Ok(())
        }
    }
}

impl Device for MockDevice {
    fn identity(&mut self) -> Result<Identity, TransportError> {
        self.connector.log.push(Call::Identity);
        self.enter(Op::Identity)?;

        Ok(Identity {
            name0: "tk1 ".into(),
            name1: "mkdf".into(),
            version: 5,
        })
    }

    fn udi(&mut self) -> Result<Udi, TransportError> {
        self.connector.log.push(Call::Udi);
        self.enter(Op::Udi)?;

        Ok(Udi::new(UDI))
    }

    const CHUNK_LEN: usize = 2;

    fn load_start(&mut self, _size: usize, secret: &Secret) -> Result<(), TransportError> {
        self.connector.log.push(Call::Load(Vec::new()));
        if let Some(uss) = secret.uss() {
            self.connector.log.secrets.lock().unwrap().push(uss.to_vec());
        }

        let op = Op::Load(self.loads);
        self.loads += 1;
        self.enter(op)
    }

    fn load_data(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        thread::sleep(self.connector.delay);
        self.connector.log.receive(chunk);
        Ok(())
    }

    fn close(self) -> Result<(), TransportError> {
        self.connector.log.push(Call::Close);
        self.enter(Op::Close)
    }
}
