use crate::{OptionFlags, OptionSpec, OptionType, OptionsManager, Result};

pub const URL_PREFIX: &str = "system.url-prefix";
pub const ADMIN_EMAIL: &str = "system.admin-email";
pub const SECRET_KEY: &str = "system.secret-key";
pub const RATE_LIMIT: &str = "system.rate-limit";

/// Read by `tessera cluster` when no threshold is passed on the command line
pub const MERGE_THRESHOLD: &str = "txnames.merge-threshold";

/// Register the options every Tessera process knows about.
pub fn register_defaults(manager: &OptionsManager) -> Result<()> {
    manager.register(
        OptionSpec::new(URL_PREFIX)
            .ty(OptionType::String)
            .flags(OptionFlags::REQUIRED | OptionFlags::PRIORITIZE_DISK)
            .grouping("system", 10),
    )?;
    manager.register(
        OptionSpec::new(ADMIN_EMAIL)
            .ty(OptionType::String)
            .flags(OptionFlags::REQUIRED | OptionFlags::PRIORITIZE_DISK)
            .grouping("system", 20),
    )?;
    manager.register(
        OptionSpec::new(SECRET_KEY)
            .ty(OptionType::String)
            .flags(OptionFlags::CREDENTIAL | OptionFlags::NOSTORE),
    )?;
    manager.register(
        OptionSpec::new(RATE_LIMIT)
            .default(0)
            .flags(OptionFlags::ALLOW_EMPTY | OptionFlags::PRIORITIZE_DISK)
            .grouping("system", 30),
    )?;

    manager.register(
        OptionSpec::new(MERGE_THRESHOLD)
            .default(100)
            .flags(OptionFlags::ADMIN_MODIFIABLE),
    )?;

    Ok(())
}
