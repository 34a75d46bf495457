use serde::Serialize;

/// Fixed memory layout of the target machine. Attached to every terminal
/// build response so the host can place the image and configure the
/// debugger without a second round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlatformParams {
    pub code_start: u32,
    pub rom_size: u32,
    pub data_start: u32,
    pub data_size: u32,
    pub stack_end: u32,
}

impl Default for PlatformParams {
    fn default() -> Self {
        Self {
            code_start: 0x0000,
            rom_size: 0x8000,
            data_start: 0x8000,
            data_size: 0x7000,
            stack_end: 0xF000,
        }
    }
}
