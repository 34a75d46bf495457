/// Strip the final extension from a path, leaving directory components
/// untouched. `"src/game.c"` becomes `"src/game"`; a path without an
/// extension is returned as-is.
pub fn strip_extension(path: &str) -> &str {
    match path.rfind('.') {
        Some(dot) if !path[dot..].contains('/') => &path[..dot],
        _ => path,
    }
}

pub fn parse_hex_u32(raw: &str) -> Option<u32> {
    let raw = raw.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(raw, 16).ok()
}
