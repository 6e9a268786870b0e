//! Typed failures of graph-building operations.

/// The kind of failure that aborted an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmErrorKind {
    /// Subset construction created more states than the configured limit.
    TooManyStates,
    /// A guarded priority was compared against a transition that does not
    /// carry its key. Holds the guard id.
    PriorInteraction(u32),
    /// A condition space grew past the configured limit. Holds the id of the
    /// first condition beyond it.
    CondCostTooHigh(u32),
    /// Bounded repetition was requested with inconsistent bounds.
    RepetitionError,
    /// The engine was driven in a way its protocol does not allow.
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsmError {
    /// The type of triggered error.
    kind: FsmErrorKind,
    /// Additional error data.
    data: Option<String>,
}

impl FsmError {
    /// Instantiates a new error.
    pub fn new(kind: FsmErrorKind) -> Self {
        Self { kind, data: None }
    }

    /// Associates additional data with the error, returning the modified error.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.with_data_mut(data);
        self
    }

    /// Associates additional data with the error.
    pub fn with_data_mut(&mut self, data: impl Into<String>) {
        self.data = Some(data.into());
    }

    pub fn kind(&self) -> FsmErrorKind {
        self.kind
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }
}

impl From<FsmErrorKind> for FsmError {
    fn from(kind: FsmErrorKind) -> Self {
        Self::new(kind)
    }
}

impl std::fmt::Display for FsmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (data, padding) = if let Some(data) = &self.data {
            (data.as_str(), " ")
        } else {
            ("", "")
        };

        match &self.kind {
            FsmErrorKind::TooManyStates => {
                write!(f, "state limit exceeded{}{}", padding, data)
            }
            FsmErrorKind::PriorInteraction(guard) => write!(
                f,
                "ambiguous priority interaction on guard {}{}{}",
                guard, padding, data
            ),
            FsmErrorKind::CondCostTooHigh(cost) => write!(
                f,
                "condition space too large at condition {}{}{}",
                cost, padding, data
            ),
            FsmErrorKind::RepetitionError => {
                write!(f, "invalid repetition bounds{}{}", padding, data)
            }
            FsmErrorKind::InternalError => write!(f, "internal error{}{}", padding, data),
        }
    }
}

impl std::error::Error for FsmError {}
