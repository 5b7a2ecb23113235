use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown rule group: {0}")]
    UnknownRuleGroup(String),

    #[error("Unknown exceptions list: {0}")]
    UnknownExceptionsList(String),
}
