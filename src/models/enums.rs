use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// The string form is also the serde wire form and the stored column value.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Role {
    Admin => "admin",
    Physician => "physician",
    Nurse => "nurse",
    PhysicalTherapist => "physical_therapist",
    OccupationalTherapist => "occupational_therapist",
    SocialWorker => "social_worker",
});

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Admin => "Administrator",
            Self::Physician => "Physician",
            Self::Nurse => "Nurse",
            Self::PhysicalTherapist => "Physical Therapist",
            Self::OccupationalTherapist => "Occupational Therapist",
            Self::SocialWorker => "Social Worker",
        }
    }
}

str_enum!(Gender {
    Male => "M",
    Female => "F",
    Other => "O",
});

str_enum!(VisitType {
    SkilledNursing => "SN",
    PhysicalTherapy => "PT",
    OccupationalTherapy => "OT",
    SpeechTherapy => "ST",
    MedicalSocialWork => "MSW",
    HomeHealthAide => "HHA",
});

impl VisitType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SkilledNursing => "Skilled Nursing",
            Self::PhysicalTherapy => "Physical Therapy",
            Self::OccupationalTherapy => "Occupational Therapy",
            Self::SpeechTherapy => "Speech Therapy",
            Self::MedicalSocialWork => "Medical Social Work",
            Self::HomeHealthAide => "Home Health Aide",
        }
    }
}

str_enum!(VisitStatus {
    Scheduled => "scheduled",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
    NoShow => "no_show",
});

impl VisitStatus {
    /// Completed, cancelled and no-show visits accept no further transitions or notes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoShow)
    }
}

str_enum!(NoteType {
    Structured => "structured",
    Unstructured => "unstructured",
    VoiceTranscript => "voice_transcript",
    AiGenerated => "ai_generated",
});

str_enum!(SummaryType {
    Brief => "brief",
    Detailed => "detailed",
    Physician => "physician",
});

str_enum!(Discipline {
    SkilledNursing => "SN",
    PhysicalTherapy => "PT",
    OccupationalTherapy => "OT",
    SpeechTherapy => "ST",
    MedicalSocialWork => "MSW",
});

str_enum!(AssessmentType {
    StartOfCare => "SOC",
    ResumptionOfCare => "ROC",
    Recertification => "RECERT",
    FollowUp => "FU",
    Transfer => "TRANSFER",
    Discharge => "DC",
});

str_enum!(MessageType {
    PhysicianUpdate => "physician_update",
    StatusReport => "status_report",
    UrgentAlert => "urgent_alert",
    CarePlan => "care_plan",
    General => "general",
});

str_enum!(FileCategory {
    LabResults => "lab_results",
    Imaging => "imaging",
    Forms => "forms",
    Prescriptions => "prescriptions",
    Insurance => "insurance",
    Other => "other",
});

str_enum!(ProcessingStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

str_enum!(TokenKind {
    Access => "access",
    Refresh => "refresh",
});
