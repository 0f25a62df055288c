//! Phone number sanitisation and log-safe rendering.

/// Keep only ASCII digits, in order.
///
/// ```
/// use relay_core::text::digits_only;
///
/// assert_eq!(digits_only("+62 812-3456"), "628123456");
/// assert_eq!(digits_only("abc"), "");
/// ```
pub fn digits_only(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Mask all but the last four characters of a phone number for logs.
///
/// ```
/// use relay_core::text::mask_phone;
///
/// assert_eq!(mask_phone("6281234567"), "******4567");
/// assert_eq!(mask_phone("123"), "123");
/// ```
pub fn mask_phone(phone: &str) -> String {
    let count = phone.chars().count();
    if count <= 4 {
        return phone.to_owned();
    }
    phone
        .chars()
        .enumerate()
        .map(|(i, c)| if i < count - 4 { '*' } else { c })
        .collect()
}
