//! Brazilian phone-number normalization.
//!
//! Numbers Zenvia reports for Brazilian mobiles sometimes omit the ninth
//! digit: country code `55` + 2-digit area code + 8-digit subscriber, i.e.
//! exactly 12 digits. WhatsApp routing needs the full 13-digit form, so the
//! missing `9` is reinserted right after the area code before anything is
//! persisted or matched.

/// Reinsert the mobile `9` into a 12-digit Brazilian number.
///
/// `551187654321` becomes `5511987654321`; anything that is not exactly
/// 12 digits starting with `55` is returned unchanged.
pub fn normalize_br_phone(phone: &str) -> String {
    if phone.len() == 12 && phone.starts_with("55") && phone.chars().all(|c| c.is_ascii_digit()) {
        format!("{}9{}", &phone[..4], &phone[4..])
    } else {
        phone.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twelve_digit_br_number_gains_nine() {
        assert_eq!(normalize_br_phone("551187654321"), "5511987654321");
    }

    #[test]
    fn thirteen_digit_br_number_unchanged() {
        assert_eq!(normalize_br_phone("5511987654321"), "5511987654321");
    }

    #[test]
    fn nine_lands_after_area_code() {
        // 55 + area 21 + 8 digits: the 9 goes between "5521" and the rest.
        assert_eq!(normalize_br_phone("552112345678"), "5521912345678");
    }

    #[test]
    fn non_br_country_code_unchanged() {
        assert_eq!(normalize_br_phone("441187654321"), "441187654321");
    }

    #[test]
    fn shorter_number_unchanged() {
        assert_eq!(normalize_br_phone("5511876543"), "5511876543");
    }

    #[test]
    fn non_digit_content_unchanged() {
        assert_eq!(normalize_br_phone("55118765432x"), "55118765432x");
    }

    #[test]
    fn empty_unchanged() {
        assert_eq!(normalize_br_phone(""), "");
    }
}
