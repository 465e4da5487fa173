use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhoneError {
    #[error("phone number is required")]
    Missing,
    #[error("invalid phone number format: {0}")]
    Invalid(String),
}

/// Normalizes a buyer-supplied phone number to the 12-digit Cameroon MSISDN
/// format (`237` + 9-digit mobile number starting with 6).
///
/// Accepted inputs: `+237699123456`, `00237699123456`, `237699123456`,
/// `699123456`, `0699123456`, with arbitrary spacing/punctuation.
pub fn normalize(raw: &str) -> Result<String, PhoneError> {
    if raw.trim().is_empty() {
        return Err(PhoneError::Missing);
    }

    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.starts_with("00237") {
        digits.replace_range(..2, "");
    } else if !digits.starts_with("237") {
        if digits.starts_with('0') {
            digits.remove(0);
        }
        digits.insert_str(0, "237");
    }

    let subscriber = &digits[3.min(digits.len())..];
    if digits.len() != 12 || !digits.starts_with("237") || !subscriber.starts_with('6') {
        return Err(PhoneError::Invalid(raw.to_string()));
    }

    Ok(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_formats() {
        for input in [
            "+237699123456",
            "00237699123456",
            "237699123456",
            "699123456",
            "0699123456",
            "6 99 12 34 56",
        ] {
            assert_eq!(normalize(input).as_deref(), Ok("237699123456"), "input={input}");
        }
    }

    #[test]
    fn rejects_bad_numbers() {
        assert_eq!(normalize(""), Err(PhoneError::Missing));
        assert!(matches!(normalize("12345"), Err(PhoneError::Invalid(_))));
        // Fixed-line prefix (2) is not a mobile number.
        assert!(matches!(normalize("237299123456"), Err(PhoneError::Invalid(_))));
        // Too many digits.
        assert!(matches!(normalize("2376991234567"), Err(PhoneError::Invalid(_))));
    }
}
