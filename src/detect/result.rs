/// Result of scoring one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Detection {
    /// Number of vehicles above the confidence threshold.
    pub car_count: u32,
    /// Confidence of the strongest accepted detection, 0.0 when none.
    pub confidence: f32,
}
