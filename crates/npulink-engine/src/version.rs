use npulink_wire::{Payload, ProtocolVersion, VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH};
use tracing::warn;

use crate::device::Device;
use crate::error::{EngineError, Result};

/// Protocol version implemented by this engine.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion {
    major: VERSION_MAJOR,
    minor: VERSION_MINOR,
    patch: VERSION_PATCH,
};

impl Device {
    /// Ask the core subsystem for its protocol version and check it.
    ///
    /// Major and minor must match exactly; the patch level may differ. A
    /// mismatch is not retried and is reported to the fault reporter.
    pub fn check_version(&self) -> Result<ProtocolVersion> {
        let shared = self.shared();
        let payload = shared.request(Payload::VersionRequest, shared.config.version_timeout)?;
        let Payload::VersionResponse(found) = payload else {
            return Err(EngineError::Malformed(format!(
                "expected version response, got {}",
                payload.message_type()
            )));
        };

        if found.major != PROTOCOL_VERSION.major || found.minor != PROTOCOL_VERSION.minor {
            warn!(
                expected = %PROTOCOL_VERSION,
                %found,
                "protocol version mismatch"
            );
            shared.report_fault(&format!(
                "protocol version mismatch: expected {PROTOCOL_VERSION}, got {found}"
            ));
            return Err(EngineError::ProtocolVersion {
                expected: PROTOCOL_VERSION,
                found,
            });
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use npulink_wire::Message;

    use crate::test_support::{reply_to_next, test_device_with_faults};

    use super::*;

    #[test]
    fn patch_difference_accepted() {
        let (device, core, faults) = test_device_with_faults();
        let remote = reply_to_next(core, |msg| {
            Some(Message::new(
                msg.id,
                Payload::VersionResponse(ProtocolVersion {
                    patch: 9,
                    ..PROTOCOL_VERSION
                }),
            ))
        });
        assert_eq!(device.check_version().unwrap().patch, 9);
        assert_eq!(faults.count(), 0);
        remote.join().unwrap();
    }

    #[test]
    fn minor_mismatch_is_fatal() {
        let (device, core, faults) = test_device_with_faults();
        let remote = reply_to_next(core, |msg| {
            Some(Message::new(
                msg.id,
                Payload::VersionResponse(ProtocolVersion {
                    minor: PROTOCOL_VERSION.minor + 1,
                    ..PROTOCOL_VERSION
                }),
            ))
        });
        let err = device.check_version().unwrap_err();
        assert!(matches!(err, EngineError::ProtocolVersion { .. }));
        assert!(err.is_fatal());
        assert_eq!(faults.count(), 1);
        remote.join().unwrap();
    }
}
