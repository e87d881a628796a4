/// Where the pipeline's weights are placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    /// Accelerator ordinal, falling back to the CPU when none is available.
    Ordinal(usize),
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::ForceCpu
    }
}
