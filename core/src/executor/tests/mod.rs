mod helpers;

mod binding_tests;
