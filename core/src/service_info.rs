//! Service information attached to every report
//!
//! The engine does not gather host facts itself; the embedder builds a
//! [`ServiceInfo`] with whatever it knows about the process and host, and
//! may register property suppliers that contribute dynamic entries each time
//! a report is generated.

use chrono::{DateTime, Utc};
use schema::{HostDto, LoadDto, MemoryDto, ProjectDto, PropertyDto, ServiceInfoDto};
use std::sync::{Arc, PoisonError, RwLock};

/// A property contributed to the service-info section of reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoProperty {
    name: String,
    display_name: Option<String>,
    value: String,
}

impl InfoProperty {
    /// A property with a machine-readable name only.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), display_name: None, value: value.into() }
    }

    /// A property with an additional human-friendly display name.
    pub fn with_display_name(
        name: impl Into<String>,
        display_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: Some(display_name.into()),
            value: value.into(),
        }
    }

    fn to_dto(&self) -> PropertyDto {
        PropertyDto {
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            value: self.value.clone(),
        }
    }
}

/// Supplies additional properties for the service-info section. Invoked on
/// the report-requesting task every time a report is generated, so it must
/// be fast.
pub trait InfoPropertiesSupplier: Send + Sync {
    /// The properties to add to the report being generated.
    fn additional_properties(&self) -> Vec<InfoProperty>;
}

/// Static facts about the service plus registered property suppliers.
/// Read-mostly and thread safe.
pub struct ServiceInfo {
    project: ProjectDto,
    host: HostDto,
    cpus: u32,
    operating_system: String,
    running_user: String,
    memory: MemoryDto,
    load: LoadDto,
    running_since: DateTime<Utc>,
    properties: Vec<InfoProperty>,
    suppliers: RwLock<Vec<Arc<dyn InfoPropertiesSupplier>>>,
}

impl ServiceInfo {
    /// Start building service info for the given project name and version.
    /// Host facts default to what the process environment reveals cheaply;
    /// override them when the embedder knows better.
    pub fn builder(
        project_name: impl Into<String>,
        project_version: impl Into<String>,
    ) -> ServiceInfoBuilder {
        ServiceInfoBuilder {
            project: ProjectDto {
                name: project_name.into(),
                version: project_version.into(),
            },
            host: HostDto {
                name: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
                primary_address: "127.0.0.1".to_string(),
            },
            cpus: std::thread::available_parallelism()
                .map(|parallelism| parallelism.get() as u32)
                .unwrap_or(1),
            operating_system: std::env::consts::OS.to_string(),
            running_user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            memory: MemoryDto::default(),
            load: LoadDto::default(),
            running_since: Utc::now(),
            properties: Vec::new(),
        }
    }

    /// When this service instance started.
    pub fn running_since(&self) -> DateTime<Utc> {
        self.running_since
    }

    /// Register a supplier of additional report properties.
    pub fn add_properties_supplier(&self, supplier: Arc<dyn InfoPropertiesSupplier>) {
        let mut suppliers = self.suppliers.write().unwrap_or_else(PoisonError::into_inner);
        suppliers.push(supplier);
    }

    /// Render the service-info section for a report generated at `now`.
    pub fn to_dto(&self, now: DateTime<Utc>) -> ServiceInfoDto {
        let mut properties: Vec<PropertyDto> =
            self.properties.iter().map(InfoProperty::to_dto).collect();
        let suppliers = self.suppliers.read().unwrap_or_else(PoisonError::into_inner);
        for supplier in suppliers.iter() {
            properties.extend(
                supplier
                    .additional_properties()
                    .iter()
                    .map(InfoProperty::to_dto),
            );
        }

        ServiceInfoDto {
            host: self.host.clone(),
            project: self.project.clone(),
            cpus: self.cpus,
            operating_system: self.operating_system.clone(),
            running_user: self.running_user.clone(),
            memory: self.memory.clone(),
            load: self.load.clone(),
            running_since: self.running_since,
            time_now: now,
            properties,
        }
    }
}

/// Builder for [`ServiceInfo`].
pub struct ServiceInfoBuilder {
    project: ProjectDto,
    host: HostDto,
    cpus: u32,
    operating_system: String,
    running_user: String,
    memory: MemoryDto,
    load: LoadDto,
    running_since: DateTime<Utc>,
    properties: Vec<InfoProperty>,
}

impl ServiceInfoBuilder {
    /// Set the host name and primary address.
    pub fn host(mut self, name: impl Into<String>, primary_address: impl Into<String>) -> Self {
        self.host = HostDto { name: name.into(), primary_address: primary_address.into() };
        self
    }

    /// Set the number of CPUs available to the process.
    pub fn cpus(mut self, cpus: u32) -> Self {
        self.cpus = cpus;
        self
    }

    /// Set the operating system identifier.
    pub fn operating_system(mut self, operating_system: impl Into<String>) -> Self {
        self.operating_system = operating_system.into();
        self
    }

    /// Set the user the process runs as.
    pub fn running_user(mut self, running_user: impl Into<String>) -> Self {
        self.running_user = running_user.into();
        self
    }

    /// Set the memory figures reported for the host and process.
    pub fn memory(mut self, memory: MemoryDto) -> Self {
        self.memory = memory;
        self
    }

    /// Set the load figures reported for the host and process.
    pub fn load(mut self, load: LoadDto) -> Self {
        self.load = load;
        self
    }

    /// Set when this service instance started. Defaults to build time.
    pub fn running_since(mut self, running_since: DateTime<Utc>) -> Self {
        self.running_since = running_since;
        self
    }

    /// Add a static property to every report.
    pub fn property(mut self, property: InfoProperty) -> Self {
        self.properties.push(property);
        self
    }

    /// Finish building.
    pub fn build(self) -> ServiceInfo {
        ServiceInfo {
            project: self.project,
            host: self.host,
            cpus: self.cpus,
            operating_system: self.operating_system,
            running_user: self.running_user,
            memory: self.memory,
            load: self.load,
            running_since: self.running_since,
            properties: self.properties,
            suppliers: RwLock::new(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSupplier;

    impl InfoPropertiesSupplier for StaticSupplier {
        fn additional_properties(&self) -> Vec<InfoProperty> {
            vec![InfoProperty::new("deploy.color", "blue")]
        }
    }

    #[test]
    fn test_to_dto_carries_project_and_time() {
        let service_info = ServiceInfo::builder("order-service", "2.4.1")
            .host("app-host-01", "10.0.0.17")
            .cpus(4)
            .build();
        let now = Utc::now();
        let dto = service_info.to_dto(now);
        assert_eq!(dto.project.name, "order-service");
        assert_eq!(dto.project.version, "2.4.1");
        assert_eq!(dto.host.name, "app-host-01");
        assert_eq!(dto.cpus, 4);
        assert_eq!(dto.time_now, now);
    }

    #[test]
    fn test_suppliers_contribute_properties() {
        let service_info = ServiceInfo::builder("order-service", "2.4.1")
            .property(InfoProperty::with_display_name("rust.version", "Rust version", "1.76"))
            .build();
        service_info.add_properties_supplier(Arc::new(StaticSupplier));

        let dto = service_info.to_dto(Utc::now());
        let names: Vec<&str> = dto.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["rust.version", "deploy.color"]);
    }
}
