// Fixtures
mod support;

// Aspect model and equality
mod aspects;

// Variable binding
mod binding;
mod scope;


mod resolver;
