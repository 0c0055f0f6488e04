use crate::domain::models::Exercise;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

const APP_JSON: &str = "app.json";
const EXERCISES_JSON: &str = "exercises.json";
const SUPPORTED_SCHEMA: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    pub title: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub view_action_title: String,
    pub skip_action_title: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "¡Hora de tu pausa activa!".to_string(),
            icon: "/logo192.svg".to_string(),
            badge: "/logo-mono.svg".to_string(),
            vibrate: vec![200, 100, 200],
            view_action_title: "Ver Pausa".to_string(),
            skip_action_title: "Saltar Pausa".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub not_found_grace_ms: u64,
    pub completion_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            not_found_grace_ms: 1_000,
            completion_delay_ms: 3_000,
        }
    }
}

impl SessionConfig {
    pub fn not_found_grace(&self) -> Duration {
        Duration::from_millis(self.not_found_grace_ms)
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub app_name: String,
    pub timezone: Tz,
    pub base_url: Url,
    pub notification: NotificationConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppConfigFile {
    app_name: Option<String>,
    timezone: Option<String>,
    base_url: Option<String>,
    #[serde(default)]
    notification: NotificationConfig,
    #[serde(default)]
    session: SessionConfig,
}

#[derive(Debug, Deserialize)]
struct ExerciseCatalogFile {
    exercises: Vec<Exercise>,
}

const DEFAULT_APP_NAME: &str = "ActivaYA";
const DEFAULT_BASE_URL: &str = "http://localhost:9002/";

fn parse_base_url(raw: &str, path: &Path) -> Result<Url, InfraError> {
    Url::parse(raw).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid baseUrl '{raw}' in {}: {error}", path.display()))
    })
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": DEFAULT_APP_NAME,
                "timezone": "UTC",
                "baseUrl": DEFAULT_BASE_URL,
                "notification": NotificationConfig::default(),
                "session": SessionConfig::default()
            }),
        ),
        (
            EXERCISES_JSON,
            serde_json::json!({
                "schema": 1,
                "exercises": default_exercises()
            }),
        ),
    ])
}

fn default_exercises() -> serde_json::Value {
    serde_json::json!([
        {
            "name": "Rotación de cuello",
            "description": "Gira la cabeza lentamente en círculos, cinco veces hacia cada lado.",
            "durationSeconds": 30,
            "mediaUrl": "/exercises/neck-rotation.gif"
        },
        {
            "name": "Elevación de hombros",
            "description": "Sube los hombros hacia las orejas, mantén dos segundos y suelta.",
            "durationSeconds": 30,
            "mediaUrl": "/exercises/shoulder-shrug.gif"
        },
        {
            "name": "Estiramiento de brazos",
            "description": "Entrelaza los dedos y estira los brazos por encima de la cabeza.",
            "durationSeconds": 45,
            "mediaUrl": "/exercises/arm-stretch.gif"
        },
        {
            "name": "Giro de torso",
            "description": "Sentado, gira el torso hacia cada lado apoyando la mano en el respaldo.",
            "durationSeconds": 45,
            "mediaUrl": "/exercises/torso-twist.gif"
        },
        {
            "name": "Estiramiento de muñecas",
            "description": "Extiende un brazo y tira suavemente de los dedos hacia atrás.",
            "durationSeconds": 40,
            "mediaUrl": "/exercises/wrist-stretch.gif"
        },
        {
            "name": "Sentadillas",
            "description": "Flexiona las rodillas manteniendo la espalda recta y vuelve a subir.",
            "durationSeconds": 60,
            "mediaUrl": "/exercises/squats.gif"
        },
        {
            "name": "Marcha en el sitio",
            "description": "Camina sin desplazarte elevando las rodillas a ritmo constante.",
            "durationSeconds": 90,
            "mediaUrl": "/exercises/marching.gif"
        },
        {
            "name": "Estiramiento de piernas",
            "description": "De pie, lleva el talón hacia el glúteo y mantén la postura.",
            "durationSeconds": 60,
            "mediaUrl": "/exercises/quad-stretch.gif"
        },
        {
            "name": "Círculos con los tobillos",
            "description": "Levanta un pie y dibuja círculos con el tobillo en ambos sentidos.",
            "durationSeconds": 30,
            "mediaUrl": "/exercises/ankle-circles.gif"
        },
        {
            "name": "Respiración profunda",
            "description": "Inhala en cuatro tiempos, mantén cuatro y exhala en seis.",
            "durationSeconds": 60,
            "mediaUrl": "/exercises/breathing.gif"
        }
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let file: AppConfigFile = serde_json::from_value(read_config(&path)?)?;
    let timezone = match non_empty(file.timezone) {
        Some(name) => name.parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid timezone '{name}' in {}: {error}", path.display()))
        })?,
        None => Tz::UTC,
    };
    let base_url = parse_base_url(
        non_empty(file.base_url).as_deref().unwrap_or(DEFAULT_BASE_URL),
        &path,
    )?;

    Ok(AppConfig {
        app_name: non_empty(file.app_name).unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
        timezone,
        base_url,
        notification: file.notification,
        session: file.session,
    })
}

pub fn load_exercise_catalog(config_dir: &Path) -> Result<Vec<Exercise>, InfraError> {
    let path = config_dir.join(EXERCISES_JSON);
    let file: ExerciseCatalogFile = serde_json::from_value(read_config(&path)?)?;

    let mut names = HashSet::new();
    for exercise in &file.exercises {
        exercise.validate().map_err(InfraError::InvalidConfig)?;
        if !names.insert(exercise.name.as_str()) {
            return Err(InfraError::InvalidConfig(format!(
                "duplicate exercise name '{}' in {}",
                exercise.name,
                path.display()
            )));
        }
    }
    Ok(file.exercises)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
