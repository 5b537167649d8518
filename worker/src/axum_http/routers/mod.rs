pub mod orphan_cleanup;
