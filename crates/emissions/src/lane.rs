/// Derive the lane identifier for a shipment.
///
/// Format: `LANE_{ORIG}_{DEST}_{mode}` where `ORIG`/`DEST` are the first three
/// characters of the city names, upper-cased. Spaces become underscores so the
/// id is safe to use as a path segment or hotspot key.
pub fn lane_id(origin_city: &str, destination_city: &str, mode: &str) -> String {
    let orig: String = origin_city.trim().chars().take(3).collect();
    let dest: String = destination_city.trim().chars().take(3).collect();
    format!(
        "LANE_{}_{}_{}",
        orig.to_uppercase(),
        dest.to_uppercase(),
        mode.trim()
    )
    .replace(' ', "_")
}
