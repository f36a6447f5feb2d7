//! Error types and handling for the Meteo service

use thiserror::Error;

/// Main error type for the Meteo service.
///
/// The first five variants are shown to the visitor as-is; the rest abort the
/// request with an internal server error.
#[derive(Error, Debug)]
pub enum MeteoError {
    /// Geocoding transport failure or non-2xx status
    #[error("Ошибка при запросе геоданных")]
    GeoServiceUnavailable,

    /// Geocoding body could not be decoded
    #[error("Некорректный ответ от геосервиса")]
    GeoMalformedResponse,

    /// Geocoding returned no results
    #[error("Город не найден")]
    GeoNotFound,

    /// Search submitted without a city
    #[error("Нужно ввести название города!")]
    MissingCityInput,

    /// `forecast_days` missing its [1, 16] range or not an integer
    #[error("Введите корректное количество дней (от 1 до 16)")]
    InvalidForecastDays,

    /// Forecast response named a timezone we cannot load
    #[error("Unknown timezone identifier '{name}'")]
    UnknownTimezone { name: String },

    /// Forecast data source failed or returned unusable data
    #[error("Forecast error: {message}")]
    Forecast { message: String },

    /// History or session storage failed
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl MeteoError {
    /// Create a new forecast error
    pub fn forecast<S: Into<String>>(message: S) -> Self {
        Self::Forecast {
            message: message.into(),
        }
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the error ends up in the search context instead of failing the request
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            MeteoError::GeoServiceUnavailable
                | MeteoError::GeoMalformedResponse
                | MeteoError::GeoNotFound
                | MeteoError::MissingCityInput
                | MeteoError::InvalidForecastDays
        )
    }

    /// Get a user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        if self.is_user_facing() {
            return self.to_string();
        }
        match self {
            MeteoError::Config { .. } => {
                "Configuration error. Please check your config file.".to_string()
            }
            _ => "Сервис временно недоступен, попробуйте позже".to_string(),
        }
    }
}

impl From<anyhow::Error> for MeteoError {
    fn from(err: anyhow::Error) -> Self {
        MeteoError::storage(format!("{err:#}"))
    }
}
