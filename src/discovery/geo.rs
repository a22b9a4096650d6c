//! Great-circle distance between player locations

/// Mean Earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometers between two (lat, lon) points given in
/// degrees. Returns `None` (never 0.0) when either endpoint is missing, so a
/// player without a location can never look "nearby".
pub fn distance_km(from: Option<(f64, f64)>, to: Option<(f64, f64)>) -> Option<f64> {
    let ((lat1, lon1), (lat2, lon2)) = (from?, to?);

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    Some(EARTH_RADIUS_KM * c)
}

/// Round to one decimal place for display.
pub fn display_km(km: f64) -> f64 {
    (km * 10.0).round() / 10.0
}
