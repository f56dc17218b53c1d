use flowcore::protocol::{DisplayGeometry, PointerSample, WheelSample};

/// Frame buffer side of the engine. Pixel-level widget rendering lives
/// outside this crate; the engine only routes input and forwards frames.
pub trait Display: Send {
    fn resize(&mut self, _geometry: DisplayGeometry) {}

    fn pointer(&mut self, _sample: PointerSample) {}

    fn wheel(&mut self, _sample: WheelSample) {}

    /// Pixels of a new frame, or `None` when nothing changed since the last call
    fn render(&mut self) -> Option<Vec<u8>>;
}

/// Display that never produces frames
#[derive(Debug, Default)]
pub struct NullDisplay;

impl Display for NullDisplay {
    fn render(&mut self) -> Option<Vec<u8>> {
        None
    }
}
