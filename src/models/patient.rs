use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::Gender;

pub const MRN_MAX_LEN: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub mrn: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub primary_diagnosis: Option<String>,
    pub secondary_diagnoses: Option<String>,
    pub allergies: Option<String>,
    pub medications: Option<String>,
    pub insurance_provider: Option<String>,
    pub insurance_id: Option<String>,
    pub assigned_physician: Option<Uuid>,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn age_on(&self, today: NaiveDate) -> i32 {
        age_on(self.date_of_birth, today)
    }

    pub fn view(self, today: NaiveDate) -> PatientView {
        PatientView {
            full_name: self.full_name(),
            age: self.age_on(today),
            patient: self,
        }
    }
}

/// Patient projection with derived fields. `age` is never stored.
#[derive(Debug, Clone, Serialize)]
pub struct PatientView {
    #[serde(flatten)]
    pub patient: Patient,
    pub full_name: String,
    pub age: i32,
}

/// Whole years between `dob` and `today`, counting a birthday only once it has passed.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

/// Largest age accepted by age-range searches.
pub const MAX_AGE_YEARS: u32 = 150;

/// The same calendar day `years` years earlier. Feb 29 clamps to Feb 28.
pub fn years_before(today: NaiveDate, years: u32) -> Option<NaiveDate> {
    today.checked_sub_months(Months::new(years.checked_mul(12)?))
}

/// Inclusive date-of-birth range for patients whose age lies in `[age_min, age_max]`.
///
/// `age >= min` holds when the birth date is on or before `today - min years`.
/// `age <= max` holds when the birth date is after `today - (max + 1) years`.
pub fn dob_range_for_ages(
    today: NaiveDate,
    age_min: Option<u32>,
    age_max: Option<u32>,
) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let latest = age_min.and_then(|min| years_before(today, min));
    let earliest = age_max
        .and_then(|max| years_before(today, max.checked_add(1)?))
        .and_then(|d| d.succ_opt());
    (earliest, latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn age_counts_birthday_on_the_day() {
        assert_eq!(age_on(date(1990, 6, 15), date(2020, 6, 15)), 30);
        assert_eq!(age_on(date(1990, 6, 15), date(2020, 6, 14)), 29);
    }

    #[test]
    fn leap_day_birthday_is_not_reached_on_feb_28() {
        assert_eq!(age_on(date(2000, 2, 29), date(2030, 2, 28)), 29);
        assert_eq!(age_on(date(2000, 2, 29), date(2030, 3, 1)), 30);
    }

    #[test]
    fn dob_range_matches_exact_age() {
        let today = date(2024, 3, 10);
        let born = date(1994, 3, 10);
        let (earliest, latest) = dob_range_for_ages(today, Some(30), Some(30));
        assert!(earliest.unwrap() <= born && born <= latest.unwrap());

        let (_, latest) = dob_range_for_ages(today, Some(31), None);
        assert!(born > latest.unwrap());
    }

    #[test]
    fn dob_range_agrees_with_age_on_across_leap_years() {
        let today = date(2024, 2, 29);
        let (earliest, latest) = dob_range_for_ages(today, Some(40), Some(40));
        let (earliest, latest) = (earliest.unwrap(), latest.unwrap());
        let mut day = earliest.pred_opt().unwrap();
        while day <= latest.succ_opt().unwrap() {
            let inside = day >= earliest && day <= latest;
            assert_eq!(inside, age_on(day, today) == 40, "mismatch for {day}");
            day = day.succ_opt().unwrap();
        }
    }
}
