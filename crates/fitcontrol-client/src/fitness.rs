//! Typed calls for exercises, workout plans, workout logs and video analysis.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::client::{ApiClient, ApiRequest, ReqwestTransport, Transport, UploadForm};
use crate::error::{ApiError, Result};
use crate::models::PaginatedResponse;

/// Video containers accepted by the analysis endpoint.
pub const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "avi", "mov", "mkv", "webm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Beginner,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Exercise {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub muscle_groups: Vec<String>,
    #[serde(default)]
    pub equipment_needed: Vec<String>,
    pub difficulty_level: Option<DifficultyLevel>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub tips: Vec<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkoutExercise {
    pub id: i64,
    pub exercise: Exercise,
    pub sets: u32,
    pub reps: u32,
    pub weight: Option<f64>,
    #[serde(default)]
    pub rest_seconds: u32,
    pub notes: Option<String>,
    #[serde(default)]
    pub order: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkoutDay {
    pub id: i64,
    pub day_number: u32,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub exercises: Vec<WorkoutExercise>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkoutPlan {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub difficulty_level: Option<DifficultyLevel>,
    pub duration_weeks: Option<u32>,
    pub days_per_week: Option<u32>,
    pub estimated_duration_minutes: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_public: bool,
    pub created_by_name: Option<String>,
    #[serde(default)]
    pub followers_count: u64,
    pub is_following: Option<bool>,
    #[serde(default)]
    pub workout_days: Vec<WorkoutDay>,
}

/// Filters for the exercise list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExerciseFilters {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub muscle_groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_level: Option<DifficultyLevel>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub equipment_needed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Filters for the plan list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkoutPlanFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_level: Option<DifficultyLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_weeks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_per_week: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// A completed exercise to record.
#[derive(Debug, Clone, Serialize)]
pub struct LogWorkoutData {
    pub exercise_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workout_day_id: Option<i64>,
    pub date: NaiveDate,
    pub sets_completed: u32,
    pub reps_completed: Vec<u32>,
    pub weights_used: Vec<f64>,
    pub duration_seconds: u32,
    pub rest_periods: Vec<u32>,
    pub perceived_exertion: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceLog {
    pub id: i64,
    pub exercise: i64,
    pub date: NaiveDate,
    #[serde(default)]
    pub sets_completed: u32,
    #[serde(default)]
    pub reps_completed: Vec<u32>,
    #[serde(default)]
    pub weights_used: Vec<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// State and results of a video analysis.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisReport {
    pub analysis_id: i64,
    pub status: Option<ProcessingStatus>,
    pub rep_count: Option<u32>,
    pub feedback_score: Option<f64>,
    pub feedback_text: Option<String>,
    /// Seconds spent processing.
    pub processing_time: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Active (or ended) association between a user and a plan.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanFollow {
    pub id: i64,
    pub user: i64,
    pub username: Option<String>,
    pub workout_plan: WorkoutPlan,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendPeriod {
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMetric {
    Weight,
    Reps,
    Duration,
    FormScore,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub metric: TrendMetric,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressTrend {
    pub exercise_id: i64,
    pub exercise_name: String,
    pub period: TrendPeriod,
    #[serde(default)]
    pub data_points: Vec<TrendPoint>,
}

/// Training summary shown on the profile and today screens.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserStats {
    pub workouts_this_week: u32,
    pub workouts_this_month: u32,
    pub current_streak: u32,
    pub total_workouts: u32,
    /// Minutes.
    pub avg_session_duration: f64,
    pub total_weight_lifted: f64,
    pub favorite_exercises: Vec<Exercise>,
    pub progress_trends: Vec<ProgressTrend>,
}

/// Paging for the analysis history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisHistoryFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

/// One row of the analysis history. Scores are only present once completed.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisSummary {
    pub id: i64,
    pub exercise_id: i64,
    pub exercise_name: String,
    pub status: ProcessingStatus,
    pub rep_count: Option<u32>,
    pub feedback_score: Option<f64>,
    pub processing_time: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisHistory {
    pub count: u64,
    #[serde(default)]
    pub results: Vec<AnalysisSummary>,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub has_previous: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzedExercise {
    pub id: i64,
    pub name: String,
    pub muscle_group: Option<String>,
    pub difficulty: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepMetric {
    pub rep_number: u32,
    pub duration: Option<f64>,
    pub rom_score: Option<f64>,
    pub speed_score: Option<f64>,
    pub form_score: Option<f64>,
    pub symmetry_score: Option<f64>,
    pub detected_errors: Option<serde_json::Value>,
}

/// Full analysis record, with per-rep metrics when the backend computed them.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisDetails {
    pub id: i64,
    pub exercise: AnalyzedExercise,
    pub status: ProcessingStatus,
    pub rep_count: Option<u32>,
    pub feedback_score: Option<f64>,
    pub feedback_text: Option<String>,
    pub processing_time: Option<f64>,
    pub analysis_data: Option<serde_json::Value>,
    #[serde(default)]
    pub rep_metrics: Vec<RepMetric>,
    pub error_message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fitness endpoints over an authenticated client.
pub struct FitnessApi<T = ReqwestTransport> {
    client: ApiClient<T>,
}

impl<T> Clone for FitnessApi<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<T: Transport> FitnessApi<T> {
    pub fn new(client: ApiClient<T>) -> Self {
        Self { client }
    }

    pub async fn list_exercises(
        &self,
        filters: &ExerciseFilters,
    ) -> Result<PaginatedResponse<Exercise>> {
        self.client.get_with_query("/exercises/", filters).await
    }

    pub async fn exercise(&self, id: i64) -> Result<Exercise> {
        self.client.get(&format!("/exercises/{}/", id)).await
    }

    pub async fn list_plans(
        &self,
        filters: &WorkoutPlanFilters,
    ) -> Result<PaginatedResponse<WorkoutPlan>> {
        self.client.get_with_query("/plans/", filters).await
    }

    pub async fn plan(&self, id: i64) -> Result<WorkoutPlan> {
        self.client.get(&format!("/plans/{}/", id)).await
    }

    pub async fn log_workout(&self, data: &LogWorkoutData) -> Result<PerformanceLog> {
        if !(1..=10).contains(&data.perceived_exertion) {
            return Err(ApiError::Validation(
                "Perceived exertion must be between 1 and 10".to_string(),
            ));
        }
        self.client.post("/log/", data).await
    }

    /// Upload a recorded set for technique analysis.
    pub async fn analyze_video(&self, exercise_id: i64, video: &Path) -> Result<AnalysisReport> {
        let extension = video
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ApiError::Validation(format!(
                "Unsupported video type. Use: {}",
                VIDEO_EXTENSIONS.join(", ")
            )));
        }

        let form = UploadForm::new()
            .text("exercise_id", exercise_id.to_string())
            .file_from_path("video", video)
            .await?;

        let report: AnalysisReport = self.client.upload("/analyze/", form).await?;
        tracing::info!(analysis_id = report.analysis_id, exercise_id, "Video submitted for analysis");
        Ok(report)
    }

    pub async fn analysis_status(&self, analysis_id: i64) -> Result<AnalysisReport> {
        self.client
            .get(&format!("/analyze/{}/status/", analysis_id))
            .await
    }

    /// Start following a plan. The backend ends any other active plan.
    pub async fn follow_plan(&self, plan_id: i64) -> Result<PlanFollow> {
        let follow: PlanFollow = self
            .client
            .send(&ApiRequest::post(format!("/plans/{}/follow/", plan_id)))
            .await?
            .json()?;
        tracing::info!(plan_id, "Following workout plan");
        Ok(follow)
    }

    pub async fn unfollow_plan(&self, plan_id: i64) -> Result<()> {
        self.client
            .send(&ApiRequest::post(format!("/plans/{}/unfollow/", plan_id)))
            .await?;
        tracing::info!(plan_id, "Stopped following workout plan");
        Ok(())
    }

    pub async fn user_stats(&self, user_id: i64) -> Result<UserStats> {
        self.client
            .get(&format!("/users/{}/stats/", user_id))
            .await
    }

    /// Past analyses of the signed-in user, newest first.
    pub async fn analysis_history(
        &self,
        filters: &AnalysisHistoryFilters,
    ) -> Result<AnalysisHistory> {
        self.client
            .get_with_query("/analyze/history/", filters)
            .await
    }

    pub async fn analysis_details(&self, analysis_id: i64) -> Result<AnalysisDetails> {
        self.client
            .get(&format!("/analyze/{}/details/", analysis_id))
            .await
    }
}
