use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use super::enums::{
    AssessmentType, Discipline, FileCategory, Gender, MessageType, ProcessingStatus, VisitStatus,
    VisitType,
};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// 1-based page request. Out-of-range sizes are clamped.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Page {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl Page {
    pub fn limit(&self) -> u32 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u32 {
        self.page.unwrap_or(1).max(1).saturating_sub(1).saturating_mul(self.limit())
    }
}

#[derive(Debug, Default)]
pub struct PatientFilter {
    pub search: Option<String>,
    pub gender: Option<Gender>,
    pub assigned_physician: Option<Uuid>,
    pub dob_from: Option<NaiveDate>,
    pub dob_to: Option<NaiveDate>,
}

#[derive(Debug, Default)]
pub struct VisitFilter {
    pub patient_id: Option<Uuid>,
    pub status: Option<VisitStatus>,
    pub visit_type: Option<VisitType>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Default)]
pub struct AssessmentFilter {
    pub patient_id: Option<Uuid>,
    pub assessment_type: Option<AssessmentType>,
    pub is_completed: Option<bool>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Default)]
pub struct OasisTemplateFilter {
    pub assessment_type: Option<AssessmentType>,
    pub discipline: Option<Discipline>,
}

#[derive(Debug, Default)]
pub struct ThreadFilter {
    pub patient_id: Option<Uuid>,
    pub is_urgent: Option<bool>,
    pub is_closed: Option<bool>,
    pub search: Option<String>,
}

#[derive(Debug, Default)]
pub struct MessageFilter {
    pub thread_id: Option<Uuid>,
    pub message_type: Option<MessageType>,
}

#[derive(Debug, Default)]
pub struct FileFilter {
    pub patient_id: Option<Uuid>,
    pub category: Option<FileCategory>,
    pub processing_status: Option<ProcessingStatus>,
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_and_clamps() {
        let page = Page::default();
        assert_eq!(page.limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(page.offset(), 0);

        let page = Page { page: Some(3), page_size: Some(500) };
        assert_eq!(page.limit(), MAX_PAGE_SIZE);
        assert_eq!(page.offset(), 200);

        let page = Page { page: Some(0), page_size: Some(0) };
        assert_eq!(page.limit(), 1);
        assert_eq!(page.offset(), 0);
    }
}
