//! Lifecycle of a single device connection.
//!
//! The session moves strictly forward through [`State`]:
//! `Unopened → Connected → Identified → Stage1Loaded → Stage2Loaded → Closed`.
//! Any failing step moves it to [`State::Failed`] instead, after which only [`Session::close`]
//! makes sense.
//!
//! The open device is shared with [`CloseHandle`]s so that an interrupt can release it from
//! another thread. Whoever takes the device out of the shared slot first closes it; every later
//! attempt finds the slot empty, so the device is closed at most once.
//!
//! The slot is held for one frame exchange at a time. A program is sent piece by piece, so a
//! close request waits for the frame in flight and not for the whole program.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    Connector, Device, Error, Identity, Result, Secret, TransportError, Udi, payload::Payload,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Unopened,
    Connected,
    Identified,
    Stage1Loaded,
    Stage2Loaded,
    Closed,
    Failed,
}

/// Which of the two programs is being sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Stage 1, prepares the device to accept the application.
    Loader,
    /// Stage 2, the user's application.
    App,
}

impl Stage {
    fn transition(self) -> (State, State) {
        match self {
            Stage::Loader => (State::Identified, State::Stage1Loaded),
            Stage::App => (State::Stage1Loaded, State::Stage2Loaded),
        }
    }
}

struct Link<D> {
    device: Mutex<Option<D>>,
    /// Set once somebody wants the device closed. No further exchange starts after that.
    closing: AtomicBool,
}

impl<D> Link<D> {
    fn new(device: D) -> Arc<Self> {
        Arc::new(Self {
            device: Mutex::new(Some(device)),
            closing: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<D>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

/// Releases the connection of a [`Session`], from any thread.
pub struct CloseHandle<D> {
    link: Arc<Link<D>>,
}

impl<D> Clone for CloseHandle<D> {
    fn clone(&self) -> Self {
        Self {
            link: Arc::clone(&self.link),
        }
    }
}

impl<D: Device> CloseHandle<D> {
    /// Close the device unless that already happened.
    ///
    /// Returns `None` if the device was closed before, by this or any other handle.
    /// Waits for the frame exchange in progress, if any.
    pub fn close(&self) -> Option<Result<(), TransportError>> {
        self.link.closing.store(true, Ordering::SeqCst);
        let device = self.link.lock().take()?;
        tracing::debug!("closing connection");
        Some(device.close())
    }
}

pub struct Session<D: Device> {
    state: State,
    link: Arc<Link<D>>,
}

impl<D: Device> Session<D> {
    /// Establish the connection. Nothing needs closing if this fails.
    pub fn open<C>(connector: &C, port: &str, speed: u32) -> Result<Self>
    where
        C: Connector<Device = D>,
    {
        let invalid = |reason: &str| Error::Connect {
            port: port.to_owned(),
            source: TransportError::InvalidArgument(reason.to_owned()),
        };
        if port.is_empty() {
            return Err(invalid("empty port"));
        }
        if speed == 0 {
            return Err(invalid("speed must be positive"));
        }

        let device = connector
            .connect(port, speed)
            .map_err(|source| Error::Connect {
                port: port.to_owned(),
                source,
            })?;
        tracing::debug!(port, speed, "connected");

        Ok(Self {
            state: State::Connected,
            link: Link::new(device),
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn close_handle(&self) -> CloseHandle<D> {
        CloseHandle {
            link: Arc::clone(&self.link),
        }
    }

    /// Query the firmware name and version.
    ///
    /// Failure here usually means the device is not running its firmware, because an
    /// application was already loaded.
    pub fn identify(&mut self) -> Result<Identity> {
        let identity = self.exchange("identify", State::Connected, D::identity, Error::Identify)?;
        self.state = State::Identified;
        Ok(identity)
    }

    /// Query the unique identifier. Only valid once identified, and does not advance the state.
    pub fn udi(&mut self) -> Result<Udi> {
        self.exchange("udi", State::Identified, D::udi, Error::Udi)
    }

    /// Send one stage. The loader must be sent, and acknowledged, before the application.
    pub fn load(&mut self, stage: Stage, payload: &Payload, secret: &Secret) -> Result<()> {
        let (from, to) = stage.transition();
        let origin = payload.origin().to_string();
        let bytes = payload.bytes();
        let failed = |source| Error::Load {
            origin: origin.clone(),
            source,
        };

        tracing::debug!(?stage, %origin, len = bytes.len(), "loading");
        self.exchange(
            "load",
            from,
            |device: &mut D| device.load_start(bytes.len(), secret),
            failed,
        )?;

        for chunk in bytes.chunks(D::CHUNK_LEN) {
            self.exchange(
                "load",
                from,
                |device: &mut D| device.load_data(chunk),
                failed,
            )?;
        }

        self.state = to;
        Ok(())
    }

    /// Release the connection, if nobody did so already.
    ///
    /// A failure to close is reported but leaves the session closed all the same.
    pub fn close(&mut self) -> Result<()> {
        let closed = self.close_handle().close();
        self.state = State::Closed;

        match closed {
            Some(result) => result.map_err(Error::Close),
            None => Ok(()),
        }
    }

    fn exchange<T>(
        &mut self,
        operation: &'static str,
        expected: State,
        call: impl FnOnce(&mut D) -> Result<T, TransportError>,
        wrap: impl FnOnce(TransportError) -> Error,
    ) -> Result<T> {
        if self.state != expected {
            let state = self.state;
            self.state = State::Failed;
            return Err(Error::OutOfOrder { operation, state });
        }

        if self.link.closing() {
            self.state = State::Failed;
            return Err(Error::Interrupted);
        }

        let mut guard = self.link.lock();
        let Some(device) = guard.as_mut() else {
            self.state = State::Failed;
            return Err(Error::Interrupted);
        };

        call(device).map_err(|err| {
            self.state = State::Failed;
            wrap(err)
        })
    }
}

impl<D: Device> Drop for Session<D> {
    fn drop(&mut self) {
        if let Some(Err(err)) = self.close_handle().close() {
            tracing::warn!(%err, "failed to close connection");
        }
    }
}
