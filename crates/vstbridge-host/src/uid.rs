//! Interface UID registry.
//!
//! The hosted ABI identifies every interface by 16 bytes laid out from the
//! canonical four-group form as: first 32-bit group little-endian, the next
//! two 16-bit groups little-endian, the trailing eight bytes in source
//! order. That layout lives in [`uid`] and nowhere else; every identifier
//! the host passes across the ABI is built through it.

use vst3::Steinberg::TUID;

/// Builds a TUID from the canonical four-group identifier.
pub const fn uid(a: u32, b: u32, c: u32, d: u32) -> TUID {
    [
        (a & 0xFF) as u8 as _,
        ((a >> 8) & 0xFF) as u8 as _,
        ((a >> 16) & 0xFF) as u8 as _,
        ((a >> 24) & 0xFF) as u8 as _,
        ((b >> 16) & 0xFF) as u8 as _,
        ((b >> 24) & 0xFF) as u8 as _,
        (b & 0xFF) as u8 as _,
        ((b >> 8) & 0xFF) as u8 as _,
        ((c >> 24) & 0xFF) as u8 as _,
        ((c >> 16) & 0xFF) as u8 as _,
        ((c >> 8) & 0xFF) as u8 as _,
        (c & 0xFF) as u8 as _,
        ((d >> 24) & 0xFF) as u8 as _,
        ((d >> 16) & 0xFF) as u8 as _,
        ((d >> 8) & 0xFF) as u8 as _,
        (d & 0xFF) as u8 as _,
    ]
}

pub const IUNKNOWN: TUID = uid(0x00000000, 0x00000000, 0xC0000000, 0x00000046);
pub const IPLUGIN_FACTORY: TUID = uid(0x7A4D811C, 0x52114A1F, 0xAED9D2EE, 0x0B43BF9F);
pub const IPLUGIN_FACTORY2: TUID = uid(0x0007B650, 0xF24B4C0B, 0xA464EDB9, 0xF00B2ABB);
pub const ICOMPONENT: TUID = uid(0xE831FF31, 0xF2D54301, 0x928EBBEE, 0x25697802);
pub const IAUDIO_PROCESSOR: TUID = uid(0x42043F99, 0xB7DA453C, 0xA569E79D, 0x9AAEC33D);
pub const IEDIT_CONTROLLER: TUID = uid(0xDCD7BBE3, 0x7742448D, 0xA874AACC, 0x979C759E);
pub const ICONNECTION_POINT: TUID = uid(0x70A4156F, 0x6E6E4026, 0x989148BF, 0xAA60D8D1);
pub const IEVENT_LIST: TUID = uid(0x3A2C4214, 0x346349FE, 0xB2C4F397, 0xB9695A44);
pub const IPLUG_VIEW: TUID = uid(0x5BC32507, 0xD06049EA, 0xA6151B52, 0x2B755B29);
pub const IPLUG_FRAME: TUID = uid(0x367FAF01, 0xAFA94693, 0x8D4DA2A0, 0xED0882A3);
pub const ICOMPONENT_HANDLER: TUID = uid(0x93A0BEA3, 0x0BD045DB, 0x8E890B0C, 0xC1E46AC6);

/// Byte-wise UID equality.
pub fn tuid_eq(a: &TUID, b: &TUID) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// Renders a UID as 32 uppercase hex characters in byte order.
pub fn tuid_hex(tuid: &TUID) -> String {
    tuid.iter().map(|&b| format!("{:02X}", b as u8)).collect()
}
