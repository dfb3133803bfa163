/// Setup mistakes in binding strings, handlers and views
///
/// These fail fast at bind time. Failures while re-running a binding from
/// a change event are logged instead, since there is no caller to return
/// them to.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindingError {
    #[error("Missing handler name at {position} in {source_text:?}")]
    MissingHandlerName {
        source_text: String,
        position: usize,
    },
    #[error("Invalid expression {source_text:?}: {message}")]
    Expression {
        source_text: String,
        message: String,
    },
    #[error("Unknown binding handler: {0}")]
    UnknownHandler(String),
    #[error("Invalid arguments for {handler}: {message}")]
    InvalidArgument { handler: String, message: String },
    #[error("Unknown view: {0}")]
    UnknownView(String),
    #[error("View already registered: {0}")]
    DuplicateView(String),
    #[error("Unknown view function: {0}")]
    UnknownFunction(String),
    #[error("View has been removed")]
    ViewRemoved,
}

impl BindingError {
    pub(crate) fn invalid(handler: &str, message: impl Into<String>) -> Self {
        BindingError::InvalidArgument {
            handler: handler.to_string(),
            message: message.into(),
        }
    }
}
