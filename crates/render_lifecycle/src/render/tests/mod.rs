//! Cross-module scenarios driven through the headless backend
