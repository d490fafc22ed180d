//! Size bins of the particle counter
//!
//! Average particle diameter of every histogram bin, in micrometers, ordered
//! the same way the telegram orders its counts (increasing diameter).

use super::BIN_COUNT;

/// Average diameter per bin in micrometers
pub const AVERAGE_DIAMETER_UM: [u16; BIN_COUNT] = [
    36, 46, 53, 60, 67, 74, 81, 88, 95, 102, 109, 116, 123, 130, 137, 144,
    151, 158, 165, 172, 179, 186, 193, 201, 208, 215, 222, 229, 236, 243,
    250, 257, 264, 271, 278, 285, 292, 300, 307, 314, 321, 328, 335, 342,
    349, 356, 364, 371, 378, 385, 392, 399, 406, 414, 421, 428, 435, 442,
    449, 456, 464, 471, 478, 490,
];

/// Average diameter per bin in meters
pub fn average_diameters_m() -> [f64; BIN_COUNT] {
    AVERAGE_DIAMETER_UM.map(|um| f64::from(um) * 1e-6)
}
