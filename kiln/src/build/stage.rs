use std::fmt;

/// The steps of a build, in the only order they can happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolvingParams,
    Packaging,
    Uploading,
    StreamingOutput,
    ResolvingId,
    Downloading,
    Done,
}

impl Stage {
    #[cfg(test)]
    pub const ALL: [Stage; 7] = [
        Stage::ResolvingParams,
        Stage::Packaging,
        Stage::Uploading,
        Stage::StreamingOutput,
        Stage::ResolvingId,
        Stage::Downloading,
        Stage::Done,
    ];

    pub const fn next(self) -> Option<Stage> {
        match self {
            Stage::ResolvingParams => Some(Stage::Packaging),
            Stage::Packaging => Some(Stage::Uploading),
            Stage::Uploading => Some(Stage::StreamingOutput),
            Stage::StreamingOutput => Some(Stage::ResolvingId),
            Stage::ResolvingId => Some(Stage::Downloading),
            Stage::Downloading => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    /// A build starts by resolving its parameters and then only ever moves to the next stage.
    pub fn can_enter(current: Option<Stage>, next: Stage) -> bool {
        match current {
            None => next == Stage::ResolvingParams,
            Some(current) => current.next() == Some(next),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::ResolvingParams => "resolving parameters",
            Stage::Packaging => "packaging",
            Stage::Uploading => "uploading",
            Stage::StreamingOutput => "streaming output",
            Stage::ResolvingId => "resolving build id",
            Stage::Downloading => "downloading",
            Stage::Done => "done",
        })
    }
}
