use crate::session::{GeneratedVariation, Progress};

/// Updates emitted while a generation run is in flight, for presentation-side
/// progress rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationUpdate<'a> {
    DescriptionsRequested,
    DescriptionsReady { styles: &'a [String] },
    VariationRendered {
        variation: &'a GeneratedVariation,
        progress: Progress,
    },
    Completed { total: usize },
    Failed { message: &'a str },
}

/// Port for receiving generation updates.
pub trait ProgressSink {
    fn on_update(&mut self, update: GenerationUpdate<'_>);
}

/// Sink for callers that do not render progress.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_update(&mut self, _update: GenerationUpdate<'_>) {}
}
