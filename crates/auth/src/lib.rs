pub mod config;
pub mod console;
pub mod error;
pub mod form;
pub mod otp;
pub mod poller;
pub mod runner;
pub mod session;
pub mod state;

pub use config::GateConfig;
pub use console::{AdminConsole, ConsoleRow, ConsoleView, Subscription, MASKED_SECRET};
pub use error::{GateError, Result};
pub use form::LoginForm;
pub use otp::{OtpBuffer, OTP_LENGTH};
pub use poller::{read_once, PollField, PollOutcome, PollResult, Poller};
pub use runner::SessionHandle;
pub use session::{ClientEvent, ClientSession, SessionUpdate};
pub use state::{SessionState, Stage, ENTRY_ROUTE};
