use std::fmt;

use thiserror::Error;

use lobby_db::StoreError;

pub type LobbyResult<T> = std::result::Result<T, LobbyError>;

/// Input rejected before anything reaches the store.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("title is required")]
    MissingTitle,
    #[error("hotel name is required")]
    MissingHotelName,
    #[error("city is required")]
    MissingCity,
    #[error("event date is required")]
    MissingDate,
    #[error("event time is required")]
    MissingTime,
    #[error("theme is required")]
    MissingTheme,
    #[error("event date is in the past")]
    EventInPast,
    #[error("departure is before arrival")]
    DepartureBeforeArrival,
    #[error("event date is outside the stay")]
    OutsideStay,
    #[error("capacity must be at least 1")]
    InvalidCapacity,
    #[error("cannot start a chat with yourself")]
    SelfChat,
    #[error("message is empty")]
    EmptyMessage,
}

impl ValidationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingTitle => "Le titre est requis",
            Self::MissingHotelName => "Le nom de l'hôtel est requis",
            Self::MissingCity => "La ville est requise",
            Self::MissingDate => "La date est requise",
            Self::MissingTime => "L'heure est requise",
            Self::MissingTheme => "La thématique est requise",
            Self::EventInPast => "La date de l'événement doit être dans le futur",
            Self::DepartureBeforeArrival => "La date de départ doit être après la date d'arrivée",
            Self::OutsideStay => "L'événement doit avoir lieu pendant votre séjour",
            Self::InvalidCapacity => "Le nombre maximum de participants doit être au moins 1",
            Self::SelfChat => "Vous ne pouvez pas démarrer une conversation avec vous-même",
            Self::EmptyMessage => "Le message est vide",
        }
    }
}

/// Write of a multi-step operation. Steps run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    Event,
    OrganizerParticipant,
    EventChat,
    Participant,
    Counter,
    ChatMembership,
}

impl fmt::Display for WriteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Event => "event insert",
            Self::OrganizerParticipant => "organizer participant insert",
            Self::EventChat => "event chat insert",
            Self::Participant => "participant write",
            Self::Counter => "participant counter update",
            Self::ChatMembership => "chat membership update",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LobbyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("daily quota of {limit} events reached")]
    QuotaExceeded { limit: u32 },

    #[error("event is full ({max} participants)")]
    Capacity { max: u32 },

    #[error("already a participant")]
    AlreadyJoined,

    #[error("the organizer cannot leave their own event")]
    OrganizerCannotLeave,

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("joining event {event_id} is required")]
    AccessRequired { event_id: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Deployment problem, typically a missing composite index.
    #[error("store configuration: {0}")]
    Configuration(StoreError),

    /// An earlier write of the operation succeeded and was not rolled back.
    #[error("{step} failed for event {event_id}: {source}")]
    PartialWrite {
        step: WriteStep,
        event_id: String,
        #[source]
        source: StoreError,
    },

    #[error("store error: {0}")]
    Transient(StoreError),
}

impl From<StoreError> for LobbyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PermissionDenied(reason) => Self::AccessDenied(reason),
            StoreError::FailedPrecondition { .. } => Self::Configuration(e),
            StoreError::NotFound { collection, id } => Self::NotFound {
                what: format!("{collection}/{id}"),
            },
            other => Self::Transient(other),
        }
    }
}

impl LobbyError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub(crate) fn partial(step: WriteStep, event_id: &str, source: StoreError) -> Self {
        Self::PartialWrite {
            step,
            event_id: event_id.to_string(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::QuotaExceeded { .. } => "quota-exceeded",
            Self::Capacity { .. } => "event-full",
            Self::AlreadyJoined => "already-joined",
            Self::OrganizerCannotLeave => "organizer-cannot-leave",
            Self::NotFound { .. } => "not-found",
            Self::AccessRequired { .. } => "access-required",
            Self::AccessDenied(_) => "permission-denied",
            Self::Configuration(_) => "configuration",
            Self::PartialWrite { .. } => "partial-write",
            Self::Transient(_) => "unavailable",
        }
    }

    /// Text shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(v) => v.user_message().to_string(),
            Self::QuotaExceeded { limit } => {
                format!("Vous avez atteint la limite de {limit} événements par jour")
            }
            Self::Capacity { .. } => "Cet événement est complet".to_string(),
            Self::AlreadyJoined => "Vous participez déjà à cet événement".to_string(),
            Self::OrganizerCannotLeave => {
                "L'organisateur ne peut pas quitter son propre événement".to_string()
            }
            Self::NotFound { .. } => "Élément introuvable".to_string(),
            Self::AccessRequired { .. } => {
                "Vous devez rejoindre l'événement pour accéder au chat".to_string()
            }
            Self::AccessDenied(_) => "Accès non autorisé".to_string(),
            Self::Configuration(_) => {
                "Configuration de la base de données incomplète, réessayez plus tard".to_string()
            }
            Self::PartialWrite { step, .. } => match step {
                WriteStep::OrganizerParticipant | WriteStep::EventChat => {
                    "L'événement a été créé mais sa configuration est incomplète".to_string()
                }
                _ => "Votre inscription est incomplète, veuillez réessayer".to_string(),
            },
            Self::Transient(_) => {
                "Service momentanément indisponible, veuillez réessayer".to_string()
            }
        }
    }
}
