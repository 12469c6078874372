use crate::model::*;

use super::store::AllocationSource;

/// Hours in `duration_ms` rounded to two decimals, as a count of hundredths of
/// an hour.
///
/// Rounds the nearest `f64` to `seconds / 3600` to its closest two-digit
/// decimal, so durations that sit on a half-hundredth in exact arithmetic
/// follow the float value (18 s is 0.01 h, 90 s is 0.03 h).
pub fn centi_hours(duration_ms: Ms) -> i64 {
    let seconds = duration_ms as f64 / 1000.0;
    let hours = seconds / 3600.0;
    format!("{hours:.2}").replace('.', "").parse().unwrap_or_default()
}

/// Booked hours per resource inside `window`.
///
/// One row per resource, in the source's order, including resources with
/// nothing booked. Each booking contributes the part of its span that lies
/// strictly inside the window; bookings that only touch a window edge
/// contribute nothing and are not listed. Every contribution is rounded to
/// two decimals before it is added to the total. An empty or inverted window
/// yields all-zero rows.
pub fn compute_utilization(source: &impl AllocationSource, window: &Span) -> Vec<UtilizationRow> {
    source
        .resources()
        .iter()
        .map(|resource| {
            let mut total: i64 = 0;
            let mut titles = Vec::new();
            for booking in source.bookings_for_resource(&resource.id) {
                if let Some(clipped) = booking.span.clip_to(window) {
                    total += centi_hours(clipped.duration_ms());
                    titles.push(booking.title.clone());
                }
            }
            UtilizationRow {
                resource: resource.clone(),
                booked_hours: total as f64 / 100.0,
                bookings: titles,
            }
        })
        .collect()
}
