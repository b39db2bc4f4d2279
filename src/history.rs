//! Historical views over held readings (charts, date ranges, nutrients).

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::SensorReading;

/// readings oldest first; ties keep their original order
pub fn chart_series(readings: &[SensorReading]) -> Vec<SensorReading> {
    let mut series = readings.to_vec();
    series.sort_by_cached_key(SensorReading::captured_instant);
    series
}

/// ascending readings captured between `start` 00:00:00 and `end` 23:59:59
pub fn filter_by_date_range(readings: &[SensorReading], start: NaiveDate, end: NaiveDate) -> Vec<SensorReading> {
    let (Some(from), Some(to)) = (start.and_hms_opt(0, 0, 0), end.and_hms_opt(23, 59, 59)) else {
        return Vec::new();
    };
    chart_series(readings)
        .into_iter()
        .filter(|r| (from..=to).contains(&r.captured_instant()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Nutrients {
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
}

/// N/P/K of the last reading in an ascending series
pub fn latest_nutrients(series: &[SensorReading]) -> Option<Nutrients> {
    series.last().map(|r| Nutrients {
        nitrogen: r.nitrogen,
        phosphorus: r.phosphorus,
        potassium: r.potassium,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(at: &str, nitrogen: f64) -> SensorReading {
        SensorReading {
            group_id: 7,
            moisture: 30.0,
            temperature: 18.0,
            electrical_conductivity: 300.0,
            ph: 6.5,
            nitrogen,
            phosphorus: 10.0,
            potassium: 100.0,
            validity_flag: "Y".to_string(),
            captured_at: at.to_string(),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn series_is_ascending_and_stable() {
        let readings = vec![
            reading("27-OCT-2025 14:00:00", 1.0),
            reading("25-OCT-2025 09:00:00", 2.0),
            reading("27-OCT-2025 14:00:00", 3.0),
            reading("garbage", 4.0),
        ];
        let series: Vec<f64> = chart_series(&readings).iter().map(|r| r.nitrogen).collect();
        assert_eq!(series, vec![4.0, 2.0, 1.0, 3.0]);
    }

    #[test]
    fn range_is_inclusive_of_whole_days() {
        let readings = vec![
            reading("24-OCT-2025 23:59:59", 1.0),
            reading("25-OCT-2025 00:00:00", 2.0),
            reading("26-OCT-2025 23:59:59", 3.0),
            reading("27-OCT-2025 00:00:00", 4.0),
        ];
        let filtered = filter_by_date_range(&readings, day(2025, 10, 25), day(2025, 10, 26));
        let kept: Vec<f64> = filtered.iter().map(|r| r.nitrogen).collect();
        assert_eq!(kept, vec![2.0, 3.0]);
    }

    #[test]
    fn reversed_range_is_empty() {
        let readings = vec![reading("25-OCT-2025 12:00:00", 1.0)];
        assert!(filter_by_date_range(&readings, day(2025, 10, 26), day(2025, 10, 24)).is_empty());
    }

    #[test]
    fn nutrients_come_from_last_entry() {
        let series = chart_series(&[reading("26-OCT-2025 12:00:00", 5.0), reading("25-OCT-2025 12:00:00", 9.0)]);
        assert_eq!(latest_nutrients(&series).unwrap().nitrogen, 5.0);
        assert_eq!(latest_nutrients(&[]), None);
    }
}
