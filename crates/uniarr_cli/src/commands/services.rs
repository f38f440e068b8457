//! Service config commands.

use uniarr_core::{AppContext, ServiceConfig, ServiceType};

/// List configured services. Credentials are never printed.
pub fn list(app: &AppContext) {
    let services = app.secure().service_configs();

    println!("Services");
    println!("========");
    if services.is_empty() {
        println!("  No services configured.");
    }
    for service in services {
        let auth = match (&service.api_key, &service.username) {
            (Some(_), _) => "api key",
            (None, Some(_)) => "basic auth",
            (None, None) => "none",
        };
        let state = if service.enabled { "enabled" } else { "disabled" };
        println!(
            "  {}  {} ({})  {}  [{state}, auth: {auth}]",
            service.id, service.name, service.service_type, service.url
        );
    }
}

/// Add a service.
pub fn add(
    app: &AppContext,
    service_type: ServiceType,
    name: String,
    url: String,
    api_key: Option<String>,
    basic_auth: Option<(String, String)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ServiceConfig::new(service_type, name, url);
    if let Some(api_key) = api_key {
        config = config.with_api_key(api_key);
    }
    if let Some((username, password)) = basic_auth {
        config = config.with_basic_auth(username, password);
    }

    let stored = app.secure().save_service_config(&config)?;
    println!("✓ Service added");
    println!("  Id: {}", stored.id);
    println!("  Type: {}", stored.service_type);
    Ok(())
}

/// Remove a service by id.
pub fn remove(app: &AppContext, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    if app.secure().service_config(id).is_none() {
        return Err(format!("No service with id {id}").into());
    }
    app.secure().remove_service_config(id)?;
    println!("✓ Service {id} removed");
    Ok(())
}
