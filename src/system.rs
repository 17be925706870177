// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Lightweight host-load sampling used by [`crate::compression`] to decide
//! whether to downgrade the compression algorithm/level under load.

use std::fs;

/// Reads the 1-minute load average from `/proc/loadavg`. Returns `None` when
/// the file can't be read (non-Linux host, permission issue, container
/// sandboxing) rather than erroring — callers treat `None` as "no signal,
/// don't downgrade".
pub fn loadavg_1m() -> Option<f64> {
    let contents = fs::read_to_string("/proc/loadavg").ok()?;
    contents.split_whitespace().next()?.parse::<f64>().ok()
}

/// Load average divided by CPU count. `0.0` (no pressure) when unavailable.
pub fn normalized_load() -> f64 {
    let cpus = num_cpus::get().max(1) as f64;
    match loadavg_1m() {
        Some(load) if load >= 0.0 => load / cpus,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_load_is_non_negative() {
        assert!(normalized_load() >= 0.0);
    }
}
