pub mod state;

pub use state::{
    BackendKind, HostedEndpoints, HostedSettings, ProviderSettings, Settings, SettingsError,
    SettingsStore,
};
