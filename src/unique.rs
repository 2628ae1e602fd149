//! Ephemeral (non-content) identifiers.
//!
//! Layout of a generated value:
//!
//! ```text
//! bytes  0..8   nanoseconds since the Unix epoch, big-endian
//! bytes  8..16  hardware cycle counter snapshot, big-endian
//! bytes 16..32  OS entropy
//! ```
//!
//! These values name sessions and staging directories. They are not
//! content keys and not security tokens.

use crate::constants::{ENTROPY_DEVICE, IDENTIFIER_LEN};
use crate::error::Result;
use crate::ident::encode_hex;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::time::{SystemTime, UNIX_EPOCH};

/// A 256-bit identifier not derived from content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EphemeralId([u8; IDENTIFIER_LEN]);

impl EphemeralId {
    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl fmt::Display for EphemeralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for EphemeralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EphemeralId({})", self.to_hex())
    }
}

/// Generates a fresh ephemeral identifier.
///
/// # Errors
///
/// [`crate::Error::Io`] if the entropy device cannot be opened or returns a
/// short read, or if the clock reads before the Unix epoch.
pub fn generate() -> Result<EphemeralId> {
    let mut id = [0u8; IDENTIFIER_LEN];

    let mut device = File::open(ENTROPY_DEVICE)?;
    device.read_exact(&mut id[16..])?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| io::Error::other(format!("clock before epoch: {e}")))?
        .as_nanos();
    let nanos = u64::try_from(nanos).map_err(|_| io::Error::other("clock out of range"))?;

    id[..8].copy_from_slice(&nanos.to_be_bytes());
    id[8..16].copy_from_slice(&hardtick().to_be_bytes());

    Ok(EphemeralId(id))
}

/// Reads the hardware cycle counter.
///
/// Falls back to the monotonic clock in nanoseconds on architectures
/// without a user-readable counter.
pub fn hardtick() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: rdtsc has no preconditions and is available on all x86_64.
        unsafe { core::arch::x86_64::_rdtsc() }
    }

    #[cfg(target_arch = "aarch64")]
    {
        let ticks: u64;
        // SAFETY: cntvct_el0 is readable from EL0 on Linux and macOS.
        unsafe {
            core::arch::asm!("mrs {}, cntvct_el0", out(reg) ticks, options(nomem, nostack));
        }
        ticks
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: ts is a valid, writable timespec.
        unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        (ts.tv_sec as u64)
            .wrapping_mul(1_000_000_000)
            .wrapping_add(ts.tv_nsec as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_prefix_is_monotone_enough() {
        let a = generate().unwrap();
        let b = generate().unwrap();
        let ta = u64::from_be_bytes(a.as_bytes()[..8].try_into().unwrap());
        let tb = u64::from_be_bytes(b.as_bytes()[..8].try_into().unwrap());
        assert!(tb >= ta);
    }

    #[test]
    fn test_hex_form() {
        let id = generate().unwrap();
        assert_eq!(id.to_hex().len(), 64);
    }
}
