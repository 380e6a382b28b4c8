// Recherche des fiches médicaments et regroupement des contre-indications.
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use std::path::Path;
use tracing::info;

use crate::models::Drug;

// En dessous de cette longueur, la recherche ne renvoie rien.
pub const MIN_QUERY_CHARS: usize = 2;

pub const CONTRAINDICATED: &str = "Противопоказано";
pub const CAUTION: &str = "С осторожностью";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NameKind {
    // Nom commercial (ТН).
    Commercial,
    // Dénomination commune internationale (МНН).
    International,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrugMatch {
    pub display_name: String,
    pub kind: NameKind,
    pub drug: Drug,
}

// Le nom commercial l'emporte dès qu'il commence par la saisie.
pub fn match_kind(drug: &Drug, query: &str) -> NameKind {
    let query = query.trim().to_lowercase();
    if drug.commercial_name.to_lowercase().starts_with(&query) {
        NameKind::Commercial
    } else {
        NameKind::International
    }
}

/// Nom affichable de la fiche correspondant à `name` (commercial ou МНН, sans
/// tenir compte de la casse), dans la graphie de la fiche.
pub fn resolve_name<'a>(drug: &'a Drug, name: &str) -> Option<&'a str> {
    let folded = name.trim().to_lowercase();
    [drug.commercial_name.as_str(), drug.mnn_name.as_str()]
        .into_iter()
        .find(|candidate| candidate.to_lowercase() == folded)
}

fn like_prefix(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 1);
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Recherche par préfixe sur le nom commercial et le МНН, insensible à la casse.
pub async fn search(db: &SqlitePool, query: &str, limit: i64) -> Result<Vec<DrugMatch>, sqlx::Error> {
    let folded = query.trim().to_lowercase();
    if folded.chars().count() < MIN_QUERY_CHARS {
        return Ok(Vec::new());
    }

    let pattern = like_prefix(&folded);
    let drugs = sqlx::query_as::<_, Drug>(
        "SELECT * FROM drugs
         WHERE commercial_name_folded LIKE ? ESCAPE '\\'
            OR mnn_name_folded LIKE ? ESCAPE '\\'
         ORDER BY commercial_name_folded
         LIMIT ?",
    )
    .bind(&pattern)
    .bind(&pattern)
    .bind(limit)
    .fetch_all(db)
    .await?;

    Ok(drugs
        .into_iter()
        .map(|drug| {
            let kind = match_kind(&drug, &folded);
            let display_name = match kind {
                NameKind::Commercial => drug.commercial_name.clone(),
                NameKind::International => drug.mnn_name.clone(),
            };
            DrugMatch {
                display_name,
                kind,
                drug,
            }
        })
        .collect())
}

pub async fn find(db: &SqlitePool, id: i64) -> Result<Option<Drug>, sqlx::Error> {
    sqlx::query_as::<_, Drug>("SELECT * FROM drugs WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

// Insère ou remplace une fiche ; `INSERT OR REPLACE` se base sur l'id.
pub async fn upsert<'e, E>(db: E, drug: &Drug) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let ci = &drug.contraindications;
    sqlx::query(
        "INSERT OR REPLACE INTO drugs (
            id, commercial_name, mnn_name, active_substance, lpid, condition_value, owner,
            pharmacotherapeutic_groups, site_addresses, owners_country, ru_number, url,
            commercial_name_folded, mnn_name_folded,
            ci_pregnancy, ci_pregnancy_t1, ci_pregnancy_t2, ci_pregnancy_t3, ci_breastfeeding,
            ci_newborns, ci_children_under_1y, ci_children_under_3y, ci_children_under_12y,
            ci_children_under_18y, ci_elderly, ci_diabetes_mellitus, ci_endocrine_disorders,
            ci_bronchial_asthma, ci_seizures_epilepsy, ci_gastrointestinal_diseases,
            ci_liver_diseases, ci_hepatic_failure, ci_kidney_diseases, ci_renal_failure,
            ci_cardiovascular_diseases, ci_heart_failure, ci_driving_and_machinery
        ) VALUES (
            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
        )",
    )
    .bind(drug.id)
    .bind(&drug.commercial_name)
    .bind(&drug.mnn_name)
    .bind(&drug.active_substance)
    .bind(&drug.lpid)
    .bind(&drug.condition_value)
    .bind(&drug.owner)
    .bind(&drug.pharmacotherapeutic_groups)
    .bind(&drug.site_addresses)
    .bind(&drug.owners_country)
    .bind(&drug.ru_number)
    .bind(&drug.url)
    .bind(drug.commercial_name.to_lowercase())
    .bind(drug.mnn_name.to_lowercase())
    .bind(&ci.ci_pregnancy)
    .bind(&ci.ci_pregnancy_t1)
    .bind(&ci.ci_pregnancy_t2)
    .bind(&ci.ci_pregnancy_t3)
    .bind(&ci.ci_breastfeeding)
    .bind(&ci.ci_newborns)
    .bind(&ci.ci_children_under_1y)
    .bind(&ci.ci_children_under_3y)
    .bind(&ci.ci_children_under_12y)
    .bind(&ci.ci_children_under_18y)
    .bind(&ci.ci_elderly)
    .bind(&ci.ci_diabetes_mellitus)
    .bind(&ci.ci_endocrine_disorders)
    .bind(&ci.ci_bronchial_asthma)
    .bind(&ci.ci_seizures_epilepsy)
    .bind(&ci.ci_gastrointestinal_diseases)
    .bind(&ci.ci_liver_diseases)
    .bind(&ci.ci_hepatic_failure)
    .bind(&ci.ci_kidney_diseases)
    .bind(&ci.ci_renal_failure)
    .bind(&ci.ci_cardiovascular_diseases)
    .bind(&ci.ci_heart_failure)
    .bind(&ci.ci_driving_and_machinery)
    .execute(db)
    .await?;

    Ok(())
}

/// Charge un export JSON (tableau de fiches) dans la table `drugs`, en une transaction.
pub async fn import_file(db: &SqlitePool, path: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    let content = tokio::fs::read_to_string(path).await?;
    let drugs: Vec<Drug> = serde_json::from_str(&content)?;

    let mut tx = db.begin().await?;
    for drug in &drugs {
        upsert(&mut *tx, drug).await?;
    }
    tx.commit().await?;

    info!("Imported {} drugs from {}", drugs.len(), path.display());
    Ok(drugs.len())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contraindication {
    pub key: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContraindicationSummary {
    pub contraindicated: Vec<Contraindication>,
    pub caution: Vec<Contraindication>,
}

// Icône et libellé de chaque colonne `ci_*`.
const MARKERS: &[(&str, &str, &str)] = &[
    ("ci_pregnancy", "pregnancy.png", "Беременность"),
    ("ci_pregnancy_t1", "pregnancy.png", "Беременность\n(I триместр)"),
    ("ci_pregnancy_t2", "pregnancy.png", "Беременность\n(II триместр)"),
    ("ci_pregnancy_t3", "pregnancy.png", "Беременность\n(III триместр)"),
    ("ci_breastfeeding", "breastfeeding.png", "Кормление\nгрудью"),
    ("ci_newborns", "newborns.png", "Новорожденные"),
    ("ci_children_under_1y", "children_under_1y.png", "Дети до\n1 года"),
    ("ci_children_under_3y", "children_under_3y.png", "Дети до\n3 лет"),
    ("ci_children_under_12y", "children_under_12y.png", "Дети до\n12 лет"),
    ("ci_children_under_18y", "children_under_18y.png", "Дети до\n18 лет"),
    ("ci_elderly", "elderly.png", "Пожилой\nвозраст"),
    ("ci_diabetes_mellitus", "diabetes_mellitus.png", "Сахарный\nдиабет"),
    ("ci_endocrine_disorders", "endocrine_disorders.png", "Эндокринные\nзаболевания"),
    ("ci_bronchial_asthma", "bronchial_asthma.png", "Бронхиальная\nастма"),
    ("ci_seizures_epilepsy", "seizures_epilepsy.png", "Судороги /\nЭпилепсия"),
    ("ci_gastrointestinal_diseases", "gastrointestinal_diseases.png", "Заболевания\nЖК"),
    ("ci_liver_diseases", "liver_diseases.png", "Заболевания\nпечени"),
    ("ci_hepatic_failure", "liver_diseases.png", "Печёночная\nнедостаточность"),
    ("ci_kidney_diseases", "kidney_diseases.png", "Заболевания\nпочек"),
    ("ci_renal_failure", "kidney_diseases.png", "Почечная\nнедостаточность"),
    ("ci_cardiovascular_diseases", "cardiovascular_diseases.png", "Болезни сердца\nи сосудов"),
    ("ci_heart_failure", "cardiovascular_diseases.png", "Сердечная\nнедостаточность"),
    ("ci_driving_and_machinery", "driving_and_machinery.png", "Управление\nтранспортом и\nмеханизмами"),
];

/// Regroupe les contre-indications d'une fiche. Les autres valeurs
/// ("Нет противопоказаний", vide...) ne sont pas affichées.
pub fn contraindications(drug: &Drug) -> ContraindicationSummary {
    let mut summary = ContraindicationSummary::default();

    for (key, value) in drug.contraindications.values() {
        let Some(value) = value.map(str::trim) else {
            continue;
        };
        let Some(&(key, icon, description)) = MARKERS.iter().find(|(k, _, _)| *k == key) else {
            continue;
        };
        let marker = Contraindication {
            key,
            icon,
            description,
        };

        if value == CONTRAINDICATED {
            summary.contraindicated.push(marker);
        } else if value == CAUTION {
            summary.caution.push(marker);
        }
    }

    summary
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrugCard {
    pub drug: Drug,
    pub contraindications: ContraindicationSummary,
}
