/// Determines if byte is a token char
/// !, #, $, %, &, ', * +, -, ., ^, _, `, |, ~, digits, alphanumeric
pub fn is_token(b: u8) -> bool {
    b > 0x1f && b < 0x7f
}

// ASCII codes to accept as part of request targets
// A-Z a-z 0-9 !#$%&'*+-._();:@=,/?[]~^
pub fn is_uri_token(ch: u8) -> bool {
    match ch {
        0..=b' ' => false,
        b'<' | b'>' => false,
        b'!'..=b'~' => true,
        0x7f.. => false,
    }
}
