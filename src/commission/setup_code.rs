//! Setup-code derivation (§4.F, Open Question).
//!
//! The wire setup code is an 8-digit decimal value in `[00000001, 99999998]`
//! (the all-zero and all-one values are reserved, per the QR-payload
//! convention most commissioning protocols of this shape use). When the
//! device's configured password is itself already in that numeric range it
//! is used directly; otherwise this module derives a stable, deterministic
//! code from the password bytes via an FNV-1a fold.

const SETUP_CODE_MIN: u32 = 1;
const SETUP_CODE_MAX: u32 = 99_999_998;
const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// FNV-1a over arbitrary bytes (§4.F Open Question decision, DESIGN.md).
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Derive the numeric setup code for a password that isn't already a valid
/// 8-digit setup code.
pub fn derive_setup_code(password: &[u8]) -> u32 {
    if let Ok(text) = std::str::from_utf8(password) {
        if let Ok(numeric) = text.parse::<u32>() {
            if (SETUP_CODE_MIN..=SETUP_CODE_MAX).contains(&numeric) {
                return numeric;
            }
        }
    }
    let folded = fnv1a(password);
    let range = (SETUP_CODE_MAX - SETUP_CODE_MIN + 1) as u64;
    SETUP_CODE_MIN + (folded % range) as u32
}

/// Render a setup code as the zero-padded 8-digit string used in QR-style
/// payloads.
pub fn format_setup_code(code: u32) -> String {
    format!("{code:08}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_password_in_range_passes_through() {
        assert_eq!(derive_setup_code(b"12345678"), 12_345_678);
    }

    #[test]
    fn non_numeric_password_derives_deterministically() {
        let a = derive_setup_code(b"hunter2-device-password");
        let b = derive_setup_code(b"hunter2-device-password");
        assert_eq!(a, b);
        assert!(a >= SETUP_CODE_MIN && a <= SETUP_CODE_MAX);
    }

    #[test]
    fn different_passwords_usually_derive_different_codes() {
        let a = derive_setup_code(b"password-one");
        let b = derive_setup_code(b"password-two");
        assert_ne!(a, b);
    }

    #[test]
    fn format_is_zero_padded_eight_digits() {
        assert_eq!(format_setup_code(42), "00000042");
        assert_eq!(format_setup_code(99_999_998), "99999998");
    }
}
