/// Format a CoreAudio `OSStatus` code into a human-readable string.
///
/// Known error codes are returned with their symbolic name. Codes that spell
/// a printable four-char code (the HAL uses those for most of its errors) are
/// shown as `'code'`; anything else is formatted as hex.
pub fn os_status(code: i32) -> String {
    match code {
        0 => "kAudioHardwareNoError (0)".to_string(),
        -1500 => "kAudioHardwareUnspecifiedError (-1500)".to_string(),
        -1501 => "kAudioHardwareNotRunningError (-1501)".to_string(),
        -1502 => "kAudioHardwareUnknownPropertyError (-1502)".to_string(),
        -1503 => "kAudioHardwareBadPropertySizeError (-1503)".to_string(),
        -1504 => "kAudioHardwareIllegalOperationError (-1504)".to_string(),
        -1505 => "kAudioHardwareBadObjectError (-1505)".to_string(),
        -1506 => "kAudioHardwareBadDeviceError (-1506)".to_string(),
        -1507 => "kAudioHardwareBadStreamError (-1507)".to_string(),
        0x7768_6F3F => "kAudioHardwareUnknownPropertyError ('who?')".to_string(),
        0x6E6F_7065 => "kAudioHardwareIllegalOperationError ('nope')".to_string(),
        0x2173_697A => "kAudioHardwareBadPropertySizeError ('!siz')".to_string(),
        0x2164_6576 => "kAudioHardwareBadDeviceError ('!dev')".to_string(),
        0x2168_6F67 => "kAudioDevicePermissionsError ('!hog')".to_string(),
        0x2164_6174 => "kAudioDeviceUnsupportedFormatError ('!dat')".to_string(),
        other => match fourcc_str(other) {
            Some(code) => format!("OSStatus '{code}' ({other})"),
            None => format!("OSStatus {other} ({other:#X})"),
        },
    }
}

/// Build a CoreAudio error string from an operation description and `OSStatus`.
pub fn ca_error(operation: &str, code: i32) -> String {
    format!("CoreAudio {operation} failed: {}", os_status(code))
}

fn fourcc_str(code: i32) -> Option<String> {
    let bytes = code.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        Some(bytes.iter().map(|&b| b as char).collect())
    } else {
        None
    }
}
