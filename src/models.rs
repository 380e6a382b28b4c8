use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::poller::Session;

// Les noms de champs JSON reprennent ceux des fiches exportées, pour que l'import soit direct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Drug {
    pub id: i64,
    pub commercial_name: String,
    pub mnn_name: String,
    #[serde(rename = "active_Substance")]
    pub active_substance: String,
    pub lpid: String,
    #[serde(default)]
    pub condition_value: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub pharmacotherapeutic_groups: Option<String>,
    #[serde(default)]
    pub site_addresses: Option<String>,
    #[serde(default)]
    pub owners_country: Option<String>,
    #[serde(default)]
    pub ru_number: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub contraindications: Contraindications,
}

/// Colonnes `ci_*` d'une fiche : "Противопоказано", "С осторожностью",
/// "Нет противопоказаний" ou vide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(default)]
pub struct Contraindications {
    pub ci_pregnancy: Option<String>,
    pub ci_pregnancy_t1: Option<String>,
    pub ci_pregnancy_t2: Option<String>,
    pub ci_pregnancy_t3: Option<String>,
    pub ci_breastfeeding: Option<String>,
    pub ci_newborns: Option<String>,
    pub ci_children_under_1y: Option<String>,
    pub ci_children_under_3y: Option<String>,
    pub ci_children_under_12y: Option<String>,
    pub ci_children_under_18y: Option<String>,
    pub ci_elderly: Option<String>,
    pub ci_diabetes_mellitus: Option<String>,
    pub ci_endocrine_disorders: Option<String>,
    pub ci_bronchial_asthma: Option<String>,
    pub ci_seizures_epilepsy: Option<String>,
    pub ci_gastrointestinal_diseases: Option<String>,
    pub ci_liver_diseases: Option<String>,
    pub ci_hepatic_failure: Option<String>,
    pub ci_kidney_diseases: Option<String>,
    pub ci_renal_failure: Option<String>,
    pub ci_cardiovascular_diseases: Option<String>,
    pub ci_heart_failure: Option<String>,
    pub ci_driving_and_machinery: Option<String>,
}

impl Contraindications {
    // Valeurs dans l'ordre d'affichage, associées au nom de colonne.
    pub fn values(&self) -> [(&'static str, Option<&str>); 23] {
        [
            ("ci_pregnancy", self.ci_pregnancy.as_deref()),
            ("ci_pregnancy_t1", self.ci_pregnancy_t1.as_deref()),
            ("ci_pregnancy_t2", self.ci_pregnancy_t2.as_deref()),
            ("ci_pregnancy_t3", self.ci_pregnancy_t3.as_deref()),
            ("ci_breastfeeding", self.ci_breastfeeding.as_deref()),
            ("ci_newborns", self.ci_newborns.as_deref()),
            ("ci_children_under_1y", self.ci_children_under_1y.as_deref()),
            ("ci_children_under_3y", self.ci_children_under_3y.as_deref()),
            ("ci_children_under_12y", self.ci_children_under_12y.as_deref()),
            ("ci_children_under_18y", self.ci_children_under_18y.as_deref()),
            ("ci_elderly", self.ci_elderly.as_deref()),
            ("ci_diabetes_mellitus", self.ci_diabetes_mellitus.as_deref()),
            ("ci_endocrine_disorders", self.ci_endocrine_disorders.as_deref()),
            ("ci_bronchial_asthma", self.ci_bronchial_asthma.as_deref()),
            ("ci_seizures_epilepsy", self.ci_seizures_epilepsy.as_deref()),
            (
                "ci_gastrointestinal_diseases",
                self.ci_gastrointestinal_diseases.as_deref(),
            ),
            ("ci_liver_diseases", self.ci_liver_diseases.as_deref()),
            ("ci_hepatic_failure", self.ci_hepatic_failure.as_deref()),
            ("ci_kidney_diseases", self.ci_kidney_diseases.as_deref()),
            ("ci_renal_failure", self.ci_renal_failure.as_deref()),
            (
                "ci_cardiovascular_diseases",
                self.ci_cardiovascular_diseases.as_deref(),
            ),
            ("ci_heart_failure", self.ci_heart_failure.as_deref()),
            (
                "ci_driving_and_machinery",
                self.ci_driving_and_machinery.as_deref(),
            ),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CacheRecord {
    pub cache_token: String,
    pub interact: Option<String>,
    pub explanation: Option<String>,
    pub created_at: f64,
    pub updated_at: f64,
}

// Corps envoyé au workflow externe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrugPayload {
    pub name: String,
    pub lpid: String,
    #[serde(rename = "active_Substance")]
    pub active_substance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionRequest {
    pub drug1: DrugPayload,
    pub drug2: DrugPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Slot {
    First,
    Second,
}

impl Slot {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(Slot::First),
            2 => Some(Slot::Second),
            _ => None,
        }
    }
}

/// Médicament choisi dans un emplacement : le nom affiché au moment du choix
/// (commercial ou МНН) et la fiche complète.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrugSelection {
    pub name: String,
    pub drug: Drug,
}

impl DrugSelection {
    pub fn payload(&self) -> DrugPayload {
        DrugPayload {
            name: self.name.clone(),
            lpid: self.drug.lpid.clone(),
            active_substance: self.drug.active_substance.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SelectDrugRequest {
    pub name: String,
    pub drug_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CacheWriteRequest {
    pub interact: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub first: String,
    pub second: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub pair: String,
    pub cache_token: String,
}

// Enregistrement de session tel qu'envoyé au navigateur, en HTTP comme en WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    #[serde(flatten)]
    pub session: Session,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: f64,
    pub sessions: usize,
}
