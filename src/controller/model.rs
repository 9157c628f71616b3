//! Load/solar model built from hourly energy history.
//!
//! Up to 72 hourly rows collapse into per-hour-of-day means for home load
//! and solar production, with an outlier filter so one laundry day or one
//! cloud band does not skew the forecast. Hour-of-day is reckoned in the
//! device's local zone.

use chrono::{DateTime, FixedOffset, Timelike};

use crate::domain::{EnergyStats, Settings};

/// Fallback load when a site has no usable history, in kWh per hour.
const FALLBACK_LOAD_KWH: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct LoadSolarModel {
    pub avg_home_load: [f64; 24],
    pub avg_solar: [f64; 24],
    /// True when there was no history at all and the model is the
    /// zero-solar / 1 kW-load fallback.
    pub degraded: bool,
}

/// Mean with the outlier rule applied: a candidate is dropped when it
/// exceeds the mean of the other samples times `multiple`, provided the
/// multiplier is positive and at least three other samples exist.
pub fn filtered_mean(samples: &[f64], multiple: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let plain = samples.iter().sum::<f64>() / samples.len() as f64;
    if multiple <= 0.0 || samples.len() < 4 {
        return plain;
    }
    let total: f64 = samples.iter().sum();
    let kept: Vec<f64> = samples
        .iter()
        .copied()
        .filter(|&candidate| {
            let others_mean = (total - candidate) / (samples.len() - 1) as f64;
            candidate <= others_mean * multiple
        })
        .collect();
    if kept.is_empty() {
        plain
    } else {
        kept.iter().sum::<f64>() / kept.len() as f64
    }
}

/// Build the per-hour-of-day model from history rows.
pub fn build_model(
    history: &[EnergyStats],
    offset: FixedOffset,
    settings: &Settings,
) -> LoadSolarModel {
    if history.is_empty() {
        return LoadSolarModel {
            avg_home_load: [FALLBACK_LOAD_KWH; 24],
            avg_solar: [0.0; 24],
            degraded: true,
        };
    }

    let multiple = settings.ignore_hour_usage_over_multiple;
    let mut load_samples: [Vec<f64>; 24] = Default::default();
    let mut solar_samples: [Vec<f64>; 24] = Default::default();
    for row in history {
        let hour = row.ts_hour_start.with_timezone(&offset).hour() as usize;
        load_samples[hour].push(row.home_kwh);
        solar_samples[hour].push(row.solar_kwh);
    }

    let mut avg_home_load = [f64::NAN; 24];
    let mut avg_solar = [f64::NAN; 24];
    for h in 0..24 {
        if !load_samples[h].is_empty() {
            avg_home_load[h] = filtered_mean(&load_samples[h], multiple);
        }
        if !solar_samples[h].is_empty() {
            avg_solar[h] = filtered_mean(&solar_samples[h], multiple);
        }
    }

    // Hours with no samples default to the day-wide mean.
    let day_load = mean_of_present(&avg_home_load).unwrap_or(FALLBACK_LOAD_KWH);
    let day_solar = mean_of_present(&avg_solar).unwrap_or(0.0);
    for h in 0..24 {
        if avg_home_load[h].is_nan() {
            avg_home_load[h] = day_load;
        }
        if avg_solar[h].is_nan() {
            avg_solar[h] = day_solar;
        }
    }

    LoadSolarModel {
        avg_home_load,
        avg_solar,
        degraded: false,
    }
}

fn mean_of_present(values: &[f64; 24]) -> Option<f64> {
    let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

/// Gaussian bump, the same shape the daily profiles are built from.
fn bump(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma.max(0.01);
    (-0.5 * z * z).exp()
}

/// Solar forecast for the projection window: the hour-of-day averages
/// scaled by how today is actually tracking.
///
/// The trend ratio compares today's observed production against the model
/// expectation for the same elapsed hours, clamped to
/// `[1/solar_trend_ratio_max, solar_trend_ratio_max]`. With a positive
/// bell multiplier the ratio is applied with a gaussian weight centered
/// near solar noon, so midday hours move more than dawn or dusk.
pub fn shaped_solar(
    model: &LoadSolarModel,
    history: &[EnergyStats],
    now: DateTime<FixedOffset>,
    settings: &Settings,
) -> [f64; 24] {
    let ratio_max = settings.solar_trend_ratio_max;
    let mut ratio = 1.0;
    if ratio_max > 1.0 {
        let today = now.date_naive();
        let mut actual = 0.0;
        let mut expected = 0.0;
        for row in history {
            let local = row.ts_hour_start.with_timezone(now.offset());
            if local.date_naive() == today {
                actual += row.solar_kwh;
                expected += model.avg_solar[local.hour() as usize];
            }
        }
        if expected > 1e-6 {
            ratio = (actual / expected).clamp(1.0 / ratio_max, ratio_max);
        }
    }

    let bell_multiplier = settings.solar_bell_curve_multiplier;
    let mut shaped = [0.0; 24];
    for (h, out) in shaped.iter_mut().enumerate() {
        let factor = if bell_multiplier > 0.0 {
            let weight = (bell_multiplier * bump(h as f64, 12.5, 2.5)).min(1.0);
            1.0 + (ratio - 1.0) * weight
        } else {
            ratio
        };
        *out = model.avg_solar[h] * factor;
    }
    shaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn offset() -> FixedOffset {
        FixedOffset::west_opt(0).unwrap()
    }

    fn row(day: u32, hour: u32, home: f64, solar: f64) -> EnergyStats {
        EnergyStats {
            ts_hour_start: Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap(),
            home_kwh: home,
            solar_kwh: solar,
            ..EnergyStats::default()
        }
    }

    #[test]
    fn outlier_dropped_at_multiplier_five() {
        let samples = [1.0, 1.1, 0.9, 10.0];
        assert!((filtered_mean(&samples, 5.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn outlier_kept_at_multiplier_fifteen() {
        let samples = [1.0, 1.1, 0.9, 10.0];
        assert!((filtered_mean(&samples, 15.0) - 3.25).abs() < 1e-9);
    }

    #[test]
    fn filter_disabled_at_zero() {
        let samples = [1.0, 1.1, 0.9, 10.0];
        assert!((filtered_mean(&samples, 0.0) - 3.25).abs() < 1e-9);
    }

    #[test]
    fn filter_needs_three_other_samples() {
        // Three samples total: the rule never engages.
        let samples = [1.0, 1.0, 50.0];
        let expected = 52.0 / 3.0;
        assert!((filtered_mean(&samples, 5.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn empty_history_degrades_to_fallback() {
        let model = build_model(&[], offset(), &Settings::default());
        assert!(model.degraded);
        assert!(model.avg_home_load.iter().all(|&v| v == 1.0));
        assert!(model.avg_solar.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn hourly_means_bucket_by_hour_of_day() {
        let history = vec![
            row(8, 6, 0.5, 0.0),
            row(9, 6, 1.5, 0.0),
            row(8, 12, 2.0, 3.0),
            row(9, 12, 2.0, 5.0),
        ];
        let model = build_model(&history, offset(), &Settings::default());
        assert!((model.avg_home_load[6] - 1.0).abs() < 1e-9);
        assert!((model.avg_solar[12] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn missing_hours_take_the_day_wide_mean() {
        let history = vec![row(8, 6, 1.0, 0.0), row(8, 12, 3.0, 4.0)];
        let model = build_model(&history, offset(), &Settings::default());
        // hour 3 has no samples: day-wide mean of (1.0, 3.0) = 2.0
        assert!((model.avg_home_load[3] - 2.0).abs() < 1e-9);
        assert!((model.avg_solar[3] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn trend_ratio_scales_solar_and_respects_cap() {
        let history = vec![
            // Yesterday sets the model: 2 kWh at hour 10.
            row(9, 10, 1.0, 2.0),
            // Today is producing double.
            row(10, 10, 1.0, 4.0),
        ];
        let settings = Settings {
            solar_trend_ratio_max: 1.5,
            ..Settings::default()
        };
        let model = build_model(&history, offset(), &settings);
        let now = Utc
            .with_ymd_and_hms(2026, 3, 10, 11, 0, 0)
            .unwrap()
            .with_timezone(&offset());
        let shaped = shaped_solar(&model, &history, now, &settings);
        // avg at hour 10 is 3.0; today's ratio 4/3 is under the 1.5 cap.
        assert!((shaped[10] - 4.0).abs() < 1e-9);

        let tight = Settings {
            solar_trend_ratio_max: 1.1,
            ..settings
        };
        let shaped_capped = shaped_solar(&model, &history, now, &tight);
        assert!((shaped_capped[10] - 3.3).abs() < 1e-9);
    }

    #[test]
    fn trend_disabled_leaves_averages_untouched() {
        let history = vec![row(9, 10, 1.0, 2.0), row(10, 10, 1.0, 6.0)];
        let settings = Settings::default(); // ratio_max 0 disables
        let model = build_model(&history, offset(), &settings);
        let now = Utc
            .with_ymd_and_hms(2026, 3, 10, 11, 0, 0)
            .unwrap()
            .with_timezone(&offset());
        let shaped = shaped_solar(&model, &history, now, &settings);
        assert_eq!(shaped[10], model.avg_solar[10]);
    }

    #[test]
    fn bell_weight_moves_midday_more_than_dawn() {
        let mut history = vec![];
        for h in 5..20 {
            history.push(row(9, h, 1.0, 2.0));
            history.push(row(10, h, 1.0, 4.0));
        }
        let settings = Settings {
            solar_trend_ratio_max: 3.0,
            solar_bell_curve_multiplier: 1.0,
            ..Settings::default()
        };
        let model = build_model(&history, offset(), &settings);
        let now = Utc
            .with_ymd_and_hms(2026, 3, 10, 20, 0, 0)
            .unwrap()
            .with_timezone(&offset());
        let shaped = shaped_solar(&model, &history, now, &settings);
        let midday_lift = shaped[12] / model.avg_solar[12];
        let dawn_lift = shaped[5] / model.avg_solar[5];
        assert!(midday_lift > dawn_lift);
    }
}
