mod azure;

pub use azure::AzureSearchStore;
