use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_database::SupabaseClient;
use shared_database::supabase::pg_value;
use shared_models::auth::User;
use shared_utils::AppState;

use crate::models::{
    CreateDoctorRequest, Doctor, DoctorError, DoctorSearchFilters, UpdateDoctorRequest,
};

const DEFAULT_PAGE_SIZE: i32 = 20;
const MAX_PAGE_SIZE: i32 = 100;

pub struct DoctorService {
    supabase: SupabaseClient,
}

impl DoctorService {
    pub fn new(state: &AppState) -> Self {
        Self {
            supabase: state.db.clone(),
        }
    }

    /// Create a doctor profile, unverified until an admin approves it.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_doctor(&self, request: CreateDoctorRequest) -> Result<Doctor, DoctorError> {
        validate_profile(&request.name, &request.specialization, request.experience_years, request.consultation_fee)?;

        if let Some(user_id) = request.user_id {
            if self.find_by_user(user_id).await?.is_some() {
                return Err(DoctorError::AlreadyRegistered);
            }
        }

        let now = Utc::now();
        let doctor_data = json!({
            "name": request.name.trim(),
            "specialization": request.specialization.trim(),
            "mode": request.mode,
            "experience_years": request.experience_years,
            "consultation_fee": request.consultation_fee,
            "languages": request.languages,
            "is_verified": false,
            "user_id": request.user_id,
            "created_at": now,
            "updated_at": now
        });

        let doctor: Doctor = self.supabase.insert("doctors", doctor_data).await?;
        info!("Doctor profile created with ID: {}", doctor.id);

        Ok(doctor)
    }

    pub async fn get_doctor(&self, doctor_id: Uuid) -> Result<Doctor, DoctorError> {
        debug!("Fetching doctor profile: {}", doctor_id);

        self.supabase
            .select_one("doctors", &format!("id=eq.{}", doctor_id))
            .await?
            .ok_or(DoctorError::NotFound)
    }

    pub async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Doctor>, DoctorError> {
        Ok(self.supabase
            .select_one("doctors", &format!("user_id=eq.{}", user_id))
            .await?)
    }

    /// Loads the doctor and checks that `user` is its owner or an admin.
    pub async fn get_managed_doctor(&self, doctor_id: Uuid, user: &User) -> Result<Doctor, DoctorError> {
        let doctor = self.get_doctor(doctor_id).await?;
        if user.is_admin() || doctor.is_owned_by(user.id) {
            Ok(doctor)
        } else {
            Err(DoctorError::Unauthorized)
        }
    }

    #[instrument(skip(self, request))]
    pub async fn update_doctor(
        &self,
        doctor_id: Uuid,
        request: UpdateDoctorRequest,
    ) -> Result<Doctor, DoctorError> {
        let mut update_data = serde_json::Map::new();

        if let Some(name) = request.name {
            if name.trim().is_empty() {
                return Err(DoctorError::ValidationError("Name cannot be empty".to_string()));
            }
            update_data.insert("name".to_string(), json!(name.trim()));
        }
        if let Some(specialization) = request.specialization {
            if specialization.trim().is_empty() {
                return Err(DoctorError::ValidationError("Specialization cannot be empty".to_string()));
            }
            update_data.insert("specialization".to_string(), json!(specialization.trim()));
        }
        if let Some(mode) = request.mode {
            update_data.insert("mode".to_string(), json!(mode));
        }
        if let Some(experience) = request.experience_years {
            if experience < 0 {
                return Err(DoctorError::ValidationError("Experience cannot be negative".to_string()));
            }
            update_data.insert("experience_years".to_string(), json!(experience));
        }
        if let Some(fee) = request.consultation_fee {
            if fee < 0.0 || !fee.is_finite() {
                return Err(DoctorError::ValidationError("Consultation fee must be a non-negative amount".to_string()));
            }
            update_data.insert("consultation_fee".to_string(), json!(fee));
        }
        if let Some(languages) = request.languages {
            update_data.insert("languages".to_string(), json!(languages));
        }

        update_data.insert("updated_at".to_string(), json!(Utc::now()));

        let mut rows: Vec<Doctor> = self.supabase
            .update("doctors", &format!("id=eq.{}", doctor_id), Value::Object(update_data))
            .await?;

        if rows.is_empty() {
            return Err(DoctorError::NotFound);
        }

        Ok(rows.swap_remove(0))
    }

    /// Search doctors; ordered by experience, then name.
    pub async fn search_doctors(
        &self,
        filters: DoctorSearchFilters,
        limit: Option<i32>,
        offset: Option<i32>,
    ) -> Result<Vec<Doctor>, DoctorError> {
        debug!("Searching doctors with filters: {:?}", filters);

        let query = build_search_query(&filters, limit, offset);
        Ok(self.supabase.select("doctors", &query).await?)
    }

    pub async fn set_verified(&self, doctor_id: Uuid, is_verified: bool) -> Result<Doctor, DoctorError> {
        info!("Setting doctor verification status: {} -> {}", doctor_id, is_verified);

        let mut rows: Vec<Doctor> = self.supabase
            .update(
                "doctors",
                &format!("id=eq.{}", doctor_id),
                json!({
                    "is_verified": is_verified,
                    "updated_at": Utc::now()
                }),
            )
            .await?;

        if rows.is_empty() {
            return Err(DoctorError::NotFound);
        }

        Ok(rows.swap_remove(0))
    }
}

fn validate_profile(name: &str, specialization: &str, experience_years: i32, fee: f64) -> Result<(), DoctorError> {
    if name.trim().is_empty() {
        return Err(DoctorError::ValidationError("Name is required".to_string()));
    }
    if specialization.trim().is_empty() {
        return Err(DoctorError::ValidationError("Specialization is required".to_string()));
    }
    if experience_years < 0 {
        return Err(DoctorError::ValidationError("Experience cannot be negative".to_string()));
    }
    if fee < 0.0 || !fee.is_finite() {
        return Err(DoctorError::ValidationError("Consultation fee must be a non-negative amount".to_string()));
    }
    Ok(())
}

pub(crate) fn build_search_query(filters: &DoctorSearchFilters, limit: Option<i32>, offset: Option<i32>) -> String {
    let mut query_parts = Vec::new();

    if let Some(specialization) = filters.specialization.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query_parts.push(format!("specialization=ilike.*{}*", pg_value(specialization)));
    }
    if let Some(mode) = filters.mode {
        query_parts.push(format!("mode=in.{}", mode.search_values()));
    }
    if let Some(min_exp) = filters.min_experience {
        query_parts.push(format!("experience_years=gte.{}", min_exp));
    }
    if let Some(language) = filters.language.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query_parts.push(format!("languages=cs.{{{}}}", pg_value(language)));
    }
    if filters.verified_only.unwrap_or(false) {
        query_parts.push("is_verified=eq.true".to_string());
    }

    query_parts.push("order=experience_years.desc,name.asc".to_string());

    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    query_parts.push(format!("limit={}", limit));
    query_parts.push(format!("offset={}", offset.unwrap_or(0).max(0)));

    query_parts.join("&")
}
