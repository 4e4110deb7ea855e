use std::path::Path;

use crate::error::BastionError;

#[cfg(unix)]
pub fn secure_directory(path: &Path) -> Result<(), BastionError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(unix)]
pub fn secure_file(path: &Path) -> Result<(), BastionError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn secure_directory(_path: &Path) -> Result<(), BastionError> {
    Ok(())
}

#[cfg(not(unix))]
pub fn secure_file(_path: &Path) -> Result<(), BastionError> {
    Ok(())
}
