use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        // out of range query timestamps
        if self.0.is::<time::error::ComponentRange>() {
            return StatusCode::BAD_REQUEST;
        }
        match self.0.downcast_ref::<Error>() {
            Some(Error::RoomNotFound(_) | Error::ParticipantNotFound(_)) => StatusCode::NOT_FOUND,
            Some(Error::InvalidAction(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(err = ?self.0, "request failed");
            (status, format!("{}\n\n{}", self.0, self.0.backtrace())).into_response()
        } else {
            (status, self.0.to_string()).into_response()
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ParticipantId, RoomId};

    #[test]
    fn status_codes() {
        let missing = AppError::from(Error::RoomNotFound(RoomId::from("abc123")));
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let action = AppError::from(Error::InvalidAction("dance".into()));
        assert_eq!(action.into_response().status(), StatusCode::BAD_REQUEST);

        let who = AppError::from(Error::ParticipantNotFound(ParticipantId::new()));
        assert_eq!(who.into_response().status(), StatusCode::NOT_FOUND);

        let until = time::OffsetDateTime::from_unix_timestamp(i64::MAX).unwrap_err();
        assert_eq!(AppError::from(until).into_response().status(), StatusCode::BAD_REQUEST);

        let other = AppError::from(anyhow::anyhow!("boom"));
        assert_eq!(other.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
