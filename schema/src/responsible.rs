//! References to the teams responsible for acting on a faulty check

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// The team that should first look into a faulty check.
///
/// A handful of well-known teams are predefined; anything else is carried as
/// an arbitrary user-supplied string. On the wire a `Responsible` is just its
/// name, so `Responsible::Developers` serializes as `"DEVELOPERS"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(into = "String", from = "String")]
pub enum Responsible {
    /// The development team that owns the service.
    Developers,
    /// The operations / platform team.
    Operations,
    /// Back-office personnel handling business processes.
    BackOffice,
    /// Front-office personnel facing customers.
    FrontOffice,
    /// Any other team, referenced by name.
    Team(String),
}

impl Responsible {
    /// The name of this team as it appears in reports.
    pub fn name(&self) -> &str {
        match self {
            Responsible::Developers => "DEVELOPERS",
            Responsible::Operations => "OPERATIONS",
            Responsible::BackOffice => "BACK_OFFICE",
            Responsible::FrontOffice => "FRONT_OFFICE",
            Responsible::Team(name) => name,
        }
    }
}

impl fmt::Display for Responsible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Responsible> for String {
    fn from(responsible: Responsible) -> Self {
        responsible.name().to_string()
    }
}

impl From<String> for Responsible {
    fn from(name: String) -> Self {
        match name.as_str() {
            "DEVELOPERS" => Responsible::Developers,
            "OPERATIONS" => Responsible::Operations,
            "BACK_OFFICE" => Responsible::BackOffice,
            "FRONT_OFFICE" => Responsible::FrontOffice,
            _ => Responsible::Team(name),
        }
    }
}

impl From<&str> for Responsible {
    fn from(name: &str) -> Self {
        Responsible::from(name.to_string())
    }
}

impl JsonSchema for Responsible {
    fn schema_name() -> String {
        "Responsible".to_string()
    }

    fn schema_id() -> Cow<'static, str> {
        Cow::Borrowed("schema::Responsible")
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}
