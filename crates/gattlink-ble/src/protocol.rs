use gattlink_core::uuids::UART_SERVICE_UUID;
use gattlink_core::WriteMode;
use uuid::Uuid;

/// How the chunks of one send are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePlan {
    /// Every chunk uses the same write mode.
    Uniform(WriteMode),
    /// Every `ack_every`-th chunk is acknowledged, the rest are not.
    ///
    /// `0` acknowledges every chunk; `usize::MAX` never acknowledges.
    Interleaved { ack_every: usize },
}

impl WritePlan {
    /// Write mode for the zero-based chunk `index`.
    pub fn mode_for(self, index: usize) -> WriteMode {
        match self {
            Self::Uniform(mode) => mode,
            Self::Interleaved { ack_every: 0 } => WriteMode::Acknowledged,
            Self::Interleaved {
                ack_every: usize::MAX,
            } => WriteMode::Unacknowledged,
            Self::Interleaved { ack_every } => {
                if (index + 1) % ack_every == 0 {
                    WriteMode::Acknowledged
                } else {
                    WriteMode::Unacknowledged
                }
            }
        }
    }
}

/// True when an advertisement's service list carries the UART service.
pub fn is_uart_advertised(service_uuids: &[Uuid]) -> bool {
    service_uuids.contains(&UART_SERVICE_UUID)
}
