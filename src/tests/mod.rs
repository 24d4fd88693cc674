mod data_source_test;
