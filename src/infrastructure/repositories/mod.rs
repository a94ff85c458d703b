mod boot_manager;

pub use boot_manager::BootManager;
