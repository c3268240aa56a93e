use tonic::{Code, Status};
use vpc_block_provider::{Kind, UserError};

fn code(kind: Kind) -> Code {
  match kind {
    Kind::InvalidArgument => Code::InvalidArgument,
    Kind::NotFound => Code::NotFound,
    Kind::AlreadyExists => Code::AlreadyExists,
    Kind::FailedPrecondition => Code::FailedPrecondition,
    Kind::Unauthenticated => Code::Unauthenticated,
    Kind::ResourceExhausted => Code::ResourceExhausted,
    Kind::Internal => Code::Internal,
    Kind::Unimplemented => Code::Unimplemented,
    Kind::Timeout => Code::DeadlineExceeded,
    Kind::Aborted => Code::Aborted,
  }
}

/// gRPC status for a user facing error. The message carries the full
/// rendering, backend error and request id included.
pub fn status(err: UserError) -> Status {
  Status::new(code(err.kind()), err.to_string())
}

pub trait IntoStatus<T> {
  fn into_status(self) -> Result<T, Status>;
}

impl<T> IntoStatus<T> for Result<T, UserError> {
  #[inline]
  fn into_status(self) -> Result<T, Status> {
    self.map_err(status)
  }
}
