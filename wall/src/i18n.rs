use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::WallError;

/// Interface language. Catalan is both the default and the fallback.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ca,
    Es,
    En,
    Fr,
}

impl FromStr for Locale {
    type Err = String;

    /// Accepts bare codes and region tags such as `es-ES` or `fr_FR`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lang = s.split(|c: char| c == '-' || c == '_').next().unwrap_or_default();
        match lang.trim().to_ascii_lowercase().as_str() {
            "ca" => Ok(Locale::Ca),
            "es" => Ok(Locale::Es),
            "en" => Ok(Locale::En),
            "fr" => Ok(Locale::Fr),
            other => Err(format!("unsupported_locale: {other}")),
        }
    }
}

impl Locale {
    /// Parse a language tag, falling back to the default locale.
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    pub fn code(self) -> &'static str {
        match self {
            Locale::Ca => "ca",
            Locale::Es => "es",
            Locale::En => "en",
            Locale::Fr => "fr",
        }
    }

    pub fn messages(self) -> &'static Messages {
        match self {
            Locale::Ca => &CA,
            Locale::Es => &ES,
            Locale::En => &EN,
            Locale::Fr => &FR,
        }
    }

    /// Transient notification shown to the actor for a failed action.
    pub fn notice(self, err: &WallError) -> &'static str {
        let m = self.messages();
        match err {
            WallError::Fetch(_) => m.load_failed,
            WallError::Unauthenticated => m.sign_in_to_post,
            WallError::EmptyPost => m.empty_post,
            WallError::Upload { .. } => m.upload_failed,
            WallError::Submit(_) => m.publish_failed,
            WallError::Delete { .. } => m.delete_failed,
            WallError::Subscribe(_) => m.live_updates_failed,
            WallError::RoleCheck(_) | WallError::Forbidden => m.forbidden,
        }
    }
}

/// User-facing strings of the wall. `{n}` is replaced by a count.
pub struct Messages {
    pub anonymous: &'static str,
    pub just_now: &'static str,
    pub minutes_ago: &'static str,
    pub hours_ago: &'static str,
    pub days_ago: &'static str,
    pub months: [&'static str; 12],
    pub published: &'static str,
    pub publish_failed: &'static str,
    pub sign_in_to_post: &'static str,
    pub empty_post: &'static str,
    pub upload_failed: &'static str,
    pub deleted: &'static str,
    pub delete_failed: &'static str,
    pub load_failed: &'static str,
    pub live_updates_failed: &'static str,
    pub forbidden: &'static str,
    pub empty_wall: &'static str,
}

static CA: Messages = Messages {
    anonymous: "Anònim",
    just_now: "Ara mateix",
    minutes_ago: "Fa {n} min",
    hours_ago: "Fa {n}h",
    days_ago: "Fa {n}d",
    months: [
        "gen.", "febr.", "març", "abr.", "maig", "juny", "jul.", "ag.", "set.", "oct.", "nov.",
        "des.",
    ],
    published: "Publicat!",
    publish_failed: "Error publicant",
    sign_in_to_post: "Has d'iniciar sessió per publicar",
    empty_post: "Escriu alguna cosa o afegeix un fitxer",
    upload_failed: "No s'ha pogut pujar un fitxer",
    deleted: "Missatge esborrat",
    delete_failed: "No s'ha pogut esborrar",
    load_failed: "No s'ha pogut carregar el mur",
    live_updates_failed: "S'han perdut les actualitzacions en directe",
    forbidden: "No tens permís per fer això",
    empty_wall: "El mur està buit!",
};

static ES: Messages = Messages {
    anonymous: "Anónimo",
    just_now: "Ahora mismo",
    minutes_ago: "Hace {n} min",
    hours_ago: "Hace {n} h",
    days_ago: "Hace {n} d",
    months: [
        "ene", "feb", "mar", "abr", "may", "jun", "jul", "ago", "sept", "oct", "nov", "dic",
    ],
    published: "¡Publicado!",
    publish_failed: "Error al publicar",
    sign_in_to_post: "Debes iniciar sesión para publicar",
    empty_post: "Escribe algo o añade un archivo",
    upload_failed: "No se ha podido subir un archivo",
    deleted: "Mensaje borrado",
    delete_failed: "No se ha podido borrar",
    load_failed: "No se ha podido cargar el muro",
    live_updates_failed: "Se han perdido las actualizaciones en directo",
    forbidden: "No tienes permiso para hacer esto",
    empty_wall: "¡El muro está vacío!",
};

static EN: Messages = Messages {
    anonymous: "Anonymous",
    just_now: "Just now",
    minutes_ago: "{n} min ago",
    hours_ago: "{n}h ago",
    days_ago: "{n}d ago",
    months: [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ],
    published: "Published!",
    publish_failed: "Could not publish",
    sign_in_to_post: "You need to sign in to post",
    empty_post: "Write something or add a file",
    upload_failed: "A file could not be uploaded",
    deleted: "Message deleted",
    delete_failed: "Could not delete",
    load_failed: "Could not load the wall",
    live_updates_failed: "Live updates were lost",
    forbidden: "You are not allowed to do that",
    empty_wall: "The wall is empty!",
};

static FR: Messages = Messages {
    anonymous: "Anonyme",
    just_now: "À l'instant",
    minutes_ago: "Il y a {n} min",
    hours_ago: "Il y a {n} h",
    days_ago: "Il y a {n} j",
    months: [
        "janv.", "févr.", "mars", "avr.", "mai", "juin", "juil.", "août", "sept.", "oct.", "nov.",
        "déc.",
    ],
    published: "Publié !",
    publish_failed: "Erreur de publication",
    sign_in_to_post: "Connecte-toi pour publier",
    empty_post: "Écris quelque chose ou ajoute un fichier",
    upload_failed: "Un fichier n'a pas pu être envoyé",
    deleted: "Message supprimé",
    delete_failed: "Impossible de supprimer",
    load_failed: "Impossible de charger le mur",
    live_updates_failed: "Les mises à jour en direct ont été perdues",
    forbidden: "Tu n'as pas la permission de faire ça",
    empty_wall: "Le mur est vide !",
};
