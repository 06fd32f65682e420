// ==========================================
// Residency Scheduler - RotationTemplate
// ==========================================
// Referenced (never embedded) by assignments.

use crate::domain::person::Person;
use crate::domain::types::{ActivityCategory, Role, TimeOfDay};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationTemplate {
    pub template_id: String,
    pub name: String,
    pub category: ActivityCategory,
    pub eligible_pgy_levels: Vec<u8>,
    pub required_certification: Option<String>,
    pub required_specialty: Option<String>, // applies to faculty

    // ===== coverage / capacity per block =====
    pub min_residents: u32,
    pub max_residents: u32,
    pub faculty_capacity: u32, // 0 = faculty cannot be placed here

    // ===== supervision =====
    pub supervision_ratio: u32,               // max PGY-1 per faculty
    pub senior_supervision_ratio: Option<u32>, // max PGY-2/3 per faculty

    pub hours_per_block: Option<f64>,
    pub time_of_day: Option<TimeOfDay>, // None = AM and PM
    pub active: bool,
}

impl RotationTemplate {
    pub fn is_clinical(&self) -> bool {
        self.category.is_clinical()
    }

    pub fn allows_time(&self, tod: TimeOfDay) -> bool {
        self.time_of_day.map_or(true, |t| t == tod)
    }

    /// PGY / credential eligibility of a person for this template.
    ///
    /// Returns the reason when not eligible.
    pub fn eligibility_of(&self, person: &Person) -> Result<(), String> {
        if !self.active {
            return Err(format!("template {} is inactive", self.name));
        }
        match person.role {
            Role::Resident => {
                let level = person
                    .pgy_level
                    .ok_or_else(|| format!("resident {} has no PGY level", person.person_id))?;
                if !self.eligible_pgy_levels.contains(&level) {
                    return Err(format!(
                        "PGY-{} not eligible for template {} (allowed {:?})",
                        level, self.name, self.eligible_pgy_levels
                    ));
                }
            }
            Role::Faculty => {
                if self.faculty_capacity == 0 {
                    return Err(format!("template {} takes no faculty", self.name));
                }
                if let Some(spec) = &self.required_specialty {
                    let ok = person
                        .specialty
                        .as_deref()
                        .map_or(false, |s| s.eq_ignore_ascii_case(spec));
                    if !ok {
                        return Err(format!("faculty lacks specialty {}", spec));
                    }
                }
            }
        }
        if let Some(cert) = &self.required_certification {
            if !person.has_certification(cert) {
                return Err(format!("missing certification {}", cert));
            }
        }
        Ok(())
    }
}
