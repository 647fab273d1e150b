/// Display version information
pub fn execute() {
    println!("blobsite {}", env!("CARGO_PKG_VERSION"));
    println!("Publish static sites to decentralized blob storage");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_execute() {
        // Version command should not panic
        execute();
    }
}
