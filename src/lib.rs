pub mod bagit;
