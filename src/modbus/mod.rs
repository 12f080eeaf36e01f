pub mod constants;
pub mod frame;
pub mod protocol;

pub use frame::{MbapCodec, MbapHeader, RequestFrame, ResponseFrame};
pub use protocol::{ExceptionCode, FunctionCode, Request, Response};
