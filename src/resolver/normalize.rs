//! ZIP/ZIP+4 input normalization

use super::ResolverError;

/// Normalize a ZIP input to `(zip5, plus4)`.
///
/// Accepts `ZZZZZ`, `ZZZZZ-PPPP`, or 9 consecutive digits in `zip`, with
/// an optional separate `plus4` parameter. Digits are extracted, leading
/// zeros preserved, and the plus4 left-padded to four digits. Anything
/// that does not reduce to 5 or 9 digits is rejected.
///
/// An add-on embedded in `zip` takes precedence over the separate
/// `plus4` parameter.
pub fn normalize_zip_input(
    zip: &str,
    plus4: Option<&str>,
) -> Result<(String, Option<String>), ResolverError> {
    let digits: String = zip.chars().filter(|c| c.is_ascii_digit()).collect();

    let (zip5, embedded) = match digits.len() {
        5 => (digits, None),
        9 => (digits[..5].to_string(), Some(digits[5..].to_string())),
        _ => {
            return Err(ResolverError::InvalidZip {
                zip: zip.to_string(),
            })
        }
    };

    if embedded.is_some() {
        return Ok((zip5, embedded));
    }

    match plus4 {
        None => Ok((zip5, None)),
        Some(raw) => {
            let plus4_digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
            if plus4_digits.is_empty() || plus4_digits.len() > 4 {
                return Err(ResolverError::InvalidZip {
                    zip: format!("{}-{}", zip, raw),
                });
            }
            Ok((zip5, Some(format!("{:0>4}", plus4_digits))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_digit_zip() {
        assert_eq!(
            normalize_zip_input("94110", None).unwrap(),
            ("94110".to_string(), None)
        );
    }

    #[test]
    fn test_leading_zeros_preserved() {
        assert_eq!(
            normalize_zip_input("01434", None).unwrap(),
            ("01434".to_string(), None)
        );
    }

    #[test]
    fn test_hyphenated_zip_plus4() {
        assert_eq!(
            normalize_zip_input("94110-1234", None).unwrap(),
            ("94110".to_string(), Some("1234".to_string()))
        );
    }

    #[test]
    fn test_nine_consecutive_digits() {
        assert_eq!(
            normalize_zip_input("941101234", None).unwrap(),
            ("94110".to_string(), Some("1234".to_string()))
        );
    }

    #[test]
    fn test_separate_plus4_left_padded() {
        assert_eq!(
            normalize_zip_input("01434", Some("1")).unwrap(),
            ("01434".to_string(), Some("0001".to_string()))
        );
    }

    #[test]
    fn test_embedded_plus4_wins_over_separate() {
        assert_eq!(
            normalize_zip_input("94110-1234", Some("9999")).unwrap(),
            ("94110".to_string(), Some("1234".to_string()))
        );
    }

    #[test]
    fn test_invalid_lengths_rejected() {
        assert!(normalize_zip_input("9411", None).is_err());
        assert!(normalize_zip_input("941101", None).is_err());
        assert!(normalize_zip_input("", None).is_err());
        assert!(normalize_zip_input("94110", Some("12345")).is_err());
    }
}
