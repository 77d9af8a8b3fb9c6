pub mod unit_tests;
