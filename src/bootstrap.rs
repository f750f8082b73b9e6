//! The bootstrap sequence, from reading the application to closing the connection.
//!
//! Steps run strictly in order and the first failure ends the sequence:
//! read payloads, connect, arm the interrupt guard, identify, fetch the UDI, load stage 1,
//! load stage 2, close. The connection is closed on every path once it was opened, and an
//! interrupt takes the same route as any other failure.

use std::{path::PathBuf, sync::Arc};

use crate::{
    Connector, Error, Result, Secret,
    console::Console,
    error::{EXIT_FAILURE, EXIT_SUCCESS},
    interrupt::{Interrupts, Terminate, terminate_process},
    payload::Payload,
    session::{Session, Stage},
};

/// Validated invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    /// Stage-2 application image.
    pub file: PathBuf,
    pub port: Option<String>,
    pub speed: u32,
    /// Show diagnostics of the device protocol.
    pub verbose: bool,
}

pub struct Bootstrap<C, I> {
    connector: C,
    interrupts: I,
    console: Console,
    terminate: Terminate,
    stage1: Option<Payload>,
}

impl<C, I> Bootstrap<C, I>
where
    C: Connector,
    C::Device: Send + 'static,
    I: Interrupts,
{
    pub fn new(connector: C, interrupts: I, console: Console) -> Self {
        Self {
            connector,
            interrupts,
            console,
            terminate: terminate_process(),
            stage1: None,
        }
    }

    /// Use `payload` as stage 1 instead of the embedded loader.
    pub fn with_stage1(mut self, payload: Payload) -> Self {
        self.stage1 = Some(payload);
        self
    }

    /// How the interrupt path ends the process.
    pub fn with_terminate(mut self, terminate: Terminate) -> Self {
        self.terminate = terminate;
        self
    }

    /// Run the whole sequence, returning the process exit status.
    pub fn run(&self, options: &Options) -> u8 {
        let (stage1, app, port) = match self.prepare(options) {
            Ok(prepared) => prepared,
            Err(err) => return self.fail(&err),
        };

        self.console
            .diag(format_args!("Connecting to device on serial port {port} ..."));
        let mut session = match Session::open(&self.connector, port, options.speed) {
            Ok(session) => session,
            Err(err) => return self.fail(&err),
        };

        let verdict = self
            .arm(&session)
            .and_then(|()| self.load(&mut session, &stage1, &app));

        let code = match &verdict {
            Ok(()) => EXIT_SUCCESS,
            Err(err) => self.fail(err),
        };

        if let Err(err) = session.close() {
            self.console.diag(format_args!("{err}"));
        }

        code
    }

    /// Everything that can go wrong before touching the device.
    fn prepare<'a>(&self, options: &'a Options) -> Result<(Payload, Payload, &'a str)> {
        let stage1 = match &self.stage1 {
            Some(payload) => payload.clone(),
            None => Payload::stage1()?,
        };

        let app = Payload::read(&options.file)?;

        let port = options
            .port
            .as_deref()
            .filter(|port| !port.is_empty())
            .ok_or_else(|| Error::Invocation("Please provide a --port.".into()))?;

        Ok((stage1, app, port))
    }

    /// Install the interrupt action: close the connection, then end the process.
    fn arm(&self, session: &Session<C::Device>) -> Result<()> {
        let handle = session.close_handle();
        let console = self.console.clone();
        let terminate = Arc::clone(&self.terminate);

        self.interrupts.arm(Box::new(move || {
            if let Some(Err(err)) = handle.close() {
                console.diag(format_args!("{}", Error::Close(err)));
            }
            terminate(EXIT_FAILURE);
        }))
    }

    fn load(
        &self,
        session: &mut Session<C::Device>,
        stage1: &Payload,
        app: &Payload,
    ) -> Result<()> {
        let identity = session.identify()?;
        self.console.diag(format_args!(
            "Firmware name0:'{}' name1:'{}' version:{}",
            identity.name0, identity.name1, identity.version
        ));

        let udi = session.udi()?;
        self.console.report(format_args!("UDI: {udi}"));

        // Authenticated loading is supported by the device but not used here.
        let secret = Secret::default();

        for (stage, payload) in [(Stage::Loader, stage1), (Stage::App, app)] {
            self.console
                .diag(format_args!("Loading {} onto device", payload.origin()));
            session.load(stage, payload, &secret)?;
        }

        tracing::info!("both stages loaded");
        Ok(())
    }

    fn fail(&self, err: &Error) -> u8 {
        self.console.diag(format_args!("{err}"));
        if let Some(hint) = err.hint() {
            self.console.diag(format_args!("{hint}"));
        }
        err.exit_code()
    }
}
