pub mod errors;

pub use errors::{TdmsError, TdmsErrorCategory, TdmsResult};
