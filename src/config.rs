use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub catalog_path: PathBuf,
    pub cleanup_cron: String,
    pub simulated_students: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let catalog_path = std::env::var("CATALOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("demos/algebra_catalog.json"));

        let cleanup_cron =
            std::env::var("SESSION_CLEANUP_CRON").unwrap_or_else(|_| "0 */5 * * * *".to_string());

        let simulated_students = std::env::var("SIMULATED_STUDENTS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(3);

        Self {
            log_level,
            catalog_path,
            cleanup_cron,
            simulated_students,
        }
    }
}
