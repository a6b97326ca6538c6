use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("charge {0} not found")]
    ChargeNotFound(i64),
    #[error("case {0} not found")]
    CaseNotFound(String),
    #[error("no defendants available")]
    DefendantsNotFound,
    #[error("no charges available")]
    ChargesNotFound,
    #[error("agency required for this operation")]
    TenantRequired,
    #[error("agency {0} is not provisioned")]
    TenantNotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("not authenticated: {0}")]
    Auth(String),
    #[error("duplicate key on `{constraint}`")]
    DuplicateKey { constraint: String },
    #[error("{service} service unavailable")]
    Infra { service: String, detail: String },
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Deliberately-raised, client-visible errors. These propagate unchanged
    /// through the session exit handler; everything else is treated as an
    /// unexpected failure and logged with tenant context before re-raising.
    pub fn is_domain(&self) -> bool {
        match self {
            Error::ChargeNotFound(_)
            | Error::CaseNotFound(_)
            | Error::DefendantsNotFound
            | Error::ChargesNotFound
            | Error::TenantRequired
            | Error::TenantNotFound(_)
            | Error::Validation(_)
            | Error::Auth(_)
            | Error::DuplicateKey { .. } => true,
            Error::Context { source, .. } => source.is_domain(),
            _ => false,
        }
    }

    /// Translate a unique-constraint violation into a conflict the caller can
    /// act on. The find-or-create paths do not serialize concurrent writers;
    /// the schema's unique constraints are the backstop.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref db) = err {
            if db.code().as_deref() == Some("23505") {
                return Error::DuplicateKey {
                    constraint: db.constraint().unwrap_or("unknown").to_string(),
                };
            }
        }
        Error::Db(err)
    }
}

pub trait WithContext<T> {
    fn context(self, msg: impl Into<String>) -> Result<T>;
}

impl<T> WithContext<T> for Result<T> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: msg.into(),
            source: Box::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_are_classified() {
        assert!(Error::ChargeNotFound(9999).is_domain());
        assert!(Error::CaseNotFound("TR-1".into()).is_domain());
        assert!(Error::Validation("bad file".into()).is_domain());
        assert!(!Error::Io(std::io::Error::other("disk gone")).is_domain());
    }

    #[test]
    fn context_preserves_domain_classification() {
        let err: Result<()> = Err(Error::CaseNotFound("TR-1".into()));
        let wrapped = err.context("while updating").unwrap_err();
        assert!(wrapped.is_domain());
    }
}
