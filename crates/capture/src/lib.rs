mod controller;
mod decoder;
mod device;
pub mod directory;
mod error;
mod frame;
mod still;

pub use controller::{CaptureController, CaptureSnapshot, CaptureState, StartOutcome, DEFAULT_SAMPLE_INTERVAL};
pub use decoder::{QrDecoder, SymbolDecoder};
pub use device::{CameraDevice, DeviceInfo, DeviceRequest, VideoStream};
pub use error::CaptureError;
pub use frame::Frame;
pub use still::decode_still_image;

use payscan_core::{InstructionError, PaymentInstruction};

/// Both capture paths yield `Option<String>`; this turns either into an instruction.
///
/// `None` (nothing decoded) stays `None`; a decoded token that does not follow the grammar
/// is an error. The decoded text is parsed as-is, trailing bytes included.
pub fn instruction_from_capture(
    token: Option<String>,
) -> Result<Option<PaymentInstruction>, InstructionError> {
    token
        .map(|t| PaymentInstruction::parse(&t))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_result_converges_on_instruction() {
        assert_eq!(instruction_from_capture(None).unwrap(), None);
        let ins = instruction_from_capture(Some("LINK:v1;code=abcd".into()))
            .unwrap()
            .unwrap();
        assert_eq!(ins.code(), "abcd");

        let ins = instruction_from_capture(Some("PAY:v01;code=x y\n".into()))
            .unwrap()
            .unwrap();
        assert_eq!(ins.code(), "x y\n");
        assert_eq!(ins.source(), "PAY:v01;code=x y\n");
        assert!(instruction_from_capture(Some("hello".into())).is_err());
    }
}
