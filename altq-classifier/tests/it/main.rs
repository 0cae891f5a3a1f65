mod ordering;
mod scenarios;
