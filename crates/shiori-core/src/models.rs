mod progress;

pub use progress::{
    progress_percentage, PositionUpdate, ProgressCollection, ProgressParams, ProgressRecord,
};
