// Dérivation du jeton de cache à partir d'une paire de noms de médicaments.
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

// Séparateur entre les deux noms normalisés.
pub const PAIR_SEPARATOR: char = '+';

// Espace de noms fixe des jetons d'interaction. Ne jamais le modifier :
// tous les enregistrements de cache existants deviendraient inaccessibles.
pub const TOKEN_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d8e_4b7a_4e3f_9a10_c4d2_e8b6_7153);

/// Clé d'un enregistrement de cache : un UUID version 5, toujours le même pour une
/// même paire de médicaments, quel que soit l'ordre ou la casse des noms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheToken(Uuid);

impl fmt::Display for CacheToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Forme canonique à 36 caractères, en minuscules.
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for CacheToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(CacheToken)
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

// Construit la chaîne "a+b" triée, indépendante de l'ordre des arguments.
pub fn pair_key(first: &str, second: &str) -> String {
    let mut names = [normalize(first), normalize(second)];
    names.sort();
    format!("{}{}{}", names[0], PAIR_SEPARATOR, names[1])
}

/// Calcule le jeton de cache d'une paire. Fonction pure : aucune dépendance à
/// l'horloge, à l'état du processus ou à un générateur aléatoire.
pub fn derive_token(first: &str, second: &str) -> CacheToken {
    let key = pair_key(first, second);
    CacheToken(Uuid::new_v5(&TOKEN_NAMESPACE, key.as_bytes()))
}
